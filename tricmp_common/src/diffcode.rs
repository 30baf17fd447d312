use crate::{Arity, Side};
use serde::{Deserialize, Serialize};

/// Set of sides, one bit per pane (bit 0 = leftmost)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SideMask(u8);

impl SideMask {
    pub const EMPTY: SideMask = SideMask(0);

    /// Mask with every side of `arity` set
    pub fn all(arity: Arity) -> Self {
        Self((1u8 << arity.count()) - 1)
    }

    pub fn insert(&mut self, side: Side) {
        self.0 |= side.bit();
    }

    pub fn remove(&mut self, side: Side) {
        self.0 &= !side.bit();
    }

    pub fn contains(&self, side: Side) -> bool {
        self.0 & side.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of sides of `arity` present in the mask
    pub fn count(&self, arity: Arity) -> usize {
        (self.0 & Self::all(arity).0).count_ones() as usize
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// Outcome of the compare step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompareResult {
    /// Never evaluated, or cleared at the start of a re-evaluation
    #[default]
    Unknown,
    /// Every existing side has identical content
    Same,
    /// At least one side differs from the first existing side
    Different,
    /// A side's content could not be read; sticky until the next evaluation
    Error,
}

/// Composite classification of one comparable unit.
///
/// Three independent groups live side by side:
/// * existence: which sides the unit is present on
/// * compare result: [`CompareResult`]
/// * content: which sides were classified as binary
///
/// Existence and compare/content groups are cleared through separate methods.
/// [`DiffCode::clear_compare_flags`] never touches existence, and existence is
/// only changed one side at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DiffCode {
    sides: SideMask,
    result: CompareResult,
    binary: SideMask,
}

impl DiffCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_existence(&mut self, side: Side) {
        self.sides.insert(side);
    }

    pub fn clear_existence(&mut self, side: Side) {
        self.sides.remove(side);
    }

    /// Mark every side of `arity` as existing
    pub fn set_all_existence(&mut self, arity: Arity) {
        for side in arity.sides() {
            self.sides.insert(side);
        }
    }

    pub fn exists(&self, side: Side) -> bool {
        self.sides.contains(side)
    }

    /// True iff the unit is present on all `arity` sides
    pub fn exist_all(&self, arity: Arity) -> bool {
        self.sides.count(arity) == arity.count()
    }

    pub fn existing_count(&self, arity: Arity) -> usize {
        self.sides.count(arity)
    }

    /// Present on fewer than `arity` sides
    pub fn is_unique(&self, arity: Arity) -> bool {
        !self.exist_all(arity)
    }

    pub fn existence(&self) -> SideMask {
        self.sides
    }

    pub fn set_result(&mut self, result: CompareResult) {
        self.result = result;
    }

    pub fn result(&self) -> CompareResult {
        self.result
    }

    pub fn is_same(&self) -> bool {
        self.result == CompareResult::Same
    }

    pub fn is_different(&self) -> bool {
        self.result == CompareResult::Different
    }

    pub fn is_failed(&self) -> bool {
        self.result == CompareResult::Error
    }

    pub fn is_evaluated(&self) -> bool {
        self.result != CompareResult::Unknown
    }

    /// Reset compare result and content flags. Existence is left untouched.
    pub fn clear_compare_flags(&mut self) {
        self.result = CompareResult::Unknown;
        self.binary = SideMask::EMPTY;
    }

    pub fn set_binary(&mut self, side: Side) {
        self.binary.insert(side);
    }

    /// Binary content detected on at least one side
    pub fn is_binary(&self) -> bool {
        !self.binary.is_empty()
    }

    pub fn is_binary_side(&self, side: Side) -> bool {
        self.binary.contains(side)
    }

    pub fn binary_sides(&self) -> SideMask {
        self.binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unevaluated() {
        let code = DiffCode::new();
        assert!(!code.is_evaluated());
        assert!(!code.is_binary());
        assert_eq!(code.existing_count(Arity::Three), 0);
    }

    #[test]
    fn test_exist_all_depends_on_arity() {
        let mut code = DiffCode::new();
        code.set_existence(Side::FIRST);
        code.set_existence(Side::SECOND);
        assert!(code.exist_all(Arity::Two));
        assert!(!code.exist_all(Arity::Three));
        assert!(code.is_unique(Arity::Three));

        code.set_existence(Side::THIRD);
        assert!(code.exist_all(Arity::Three));
    }

    #[test]
    fn test_clear_compare_flags_keeps_existence() {
        let mut code = DiffCode::new();
        code.set_all_existence(Arity::Three);
        code.clear_existence(Side::SECOND);
        code.set_result(CompareResult::Different);
        code.set_binary(Side::FIRST);

        code.clear_compare_flags();

        assert_eq!(code.result(), CompareResult::Unknown);
        assert!(!code.is_binary());
        assert!(code.exists(Side::FIRST));
        assert!(!code.exists(Side::SECOND));
        assert!(code.exists(Side::THIRD));
    }

    #[test]
    fn test_clear_existence_keeps_compare_flags() {
        let mut code = DiffCode::new();
        code.set_all_existence(Arity::Two);
        code.set_result(CompareResult::Same);
        code.set_binary(Side::SECOND);

        code.clear_existence(Side::SECOND);

        assert!(code.is_same());
        assert!(code.is_binary_side(Side::SECOND));
        assert_eq!(code.existing_count(Arity::Two), 1);
    }

    #[test]
    fn test_side_mask_count_ignores_sides_beyond_arity() {
        let mut mask = SideMask::EMPTY;
        mask.insert(Side::FIRST);
        mask.insert(Side::THIRD);
        assert_eq!(mask.count(Arity::Two), 1);
        assert_eq!(mask.count(Arity::Three), 2);
        assert_eq!(mask.bits(), 0b101);
    }
}
