use crate::content::ContentProvider;
use regex::Regex;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};
use tricmp_common::{
    AppConfig, Arity, Blake3Hash, CompareMethod, CompareResult, DiffCode, Side, SideData,
    TextCompareOptions, TricmpError, WhitespaceMode,
};

const DEFAULT_SAMPLE_SIZE: usize = 8 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Compiled text normalization rules
#[derive(Debug, Clone, Default)]
pub struct TextRules {
    ignore_eol: bool,
    ignore_case: bool,
    whitespace: WhitespaceMode,
    filters: Vec<Regex>,
}

impl TextRules {
    pub fn compile(options: &TextCompareOptions) -> Result<Self, TricmpError> {
        let filters = options
            .line_filters
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    TricmpError::Config(format!("Invalid line filter '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            ignore_eol: options.ignore_eol,
            ignore_case: options.ignore_case,
            whitespace: options.whitespace,
            filters,
        })
    }

    pub fn is_active(&self) -> bool {
        self.ignore_eol
            || self.ignore_case
            || self.whitespace != WhitespaceMode::Exact
            || !self.filters.is_empty()
    }

    /// Split into comparable lines, applying every rule
    pub fn normalize(&self, bytes: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(bytes);
        let raw_lines: Vec<&str> = if self.ignore_eol {
            text.split_terminator('\n')
                .flat_map(|l| l.strip_suffix('\r').unwrap_or(l).split('\r'))
                .collect()
        } else {
            text.split_inclusive('\n').collect()
        };

        raw_lines
            .into_iter()
            .filter(|line| {
                let body = line.trim_end_matches(['\r', '\n']);
                !self.filters.iter().any(|re| re.is_match(body))
            })
            .map(|line| self.normalize_line(line))
            .collect()
    }

    fn normalize_line(&self, line: &str) -> String {
        let line = match self.whitespace {
            WhitespaceMode::Exact => line.to_string(),
            WhitespaceMode::IgnoreAll => line.chars().filter(|c| !is_blank(*c)).collect(),
            WhitespaceMode::IgnoreChanges => collapse_blanks(line),
        };
        if self.ignore_case {
            line.to_lowercase()
        } else {
            line
        }
    }
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn collapse_blanks(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for c in line.chars() {
        if is_blank(c) {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    // Trailing blanks before the terminator do not count as a change
    let terminator_start = out.trim_end_matches(['\r', '\n']).len();
    let terminator = out[terminator_start..].to_string();
    let body = out[..terminator_start].trim_end_matches(' ').to_string();
    body + &terminator
}

/// A side is binary when its leading sample contains a NUL byte.
/// UTF-16 content announced by a byte-order mark counts as text.
pub fn looks_binary(sample: &[u8]) -> bool {
    if sample.starts_with(&[0xFF, 0xFE]) || sample.starts_with(&[0xFE, 0xFF]) {
        return false;
    }
    sample.contains(&0)
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub method: CompareMethod,
    /// Bytes read from the head of each side for binary detection
    pub sample_size: usize,
    /// Read size for byte-wise comparison
    pub chunk_size: usize,
    /// Timestamps closer than this compare equal
    pub time_tolerance: Duration,
    pub text: TextRules,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            method: CompareMethod::ByContent,
            sample_size: DEFAULT_SAMPLE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            time_tolerance: Duration::ZERO,
            text: TextRules::default(),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Result<Self, TricmpError> {
        Ok(Self {
            method: config.compare_method,
            sample_size: config.binary_sample_size.max(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
            time_tolerance: Duration::from_secs(config.time_tolerance_secs),
            text: TextRules::compile(&config.text)?,
        })
    }
}

/// Result of one evaluation pass. Nothing is committed yet.
#[derive(Debug)]
pub struct Evaluation {
    pub code: DiffCode,
    /// Fresh per-side metadata, dirty flags clear
    pub sides: Vec<SideData>,
    /// Content failures that turned the result into [`CompareResult::Error`]
    pub failures: Vec<TricmpError>,
}

/// Classifies N sides as same, different or unique
#[derive(Debug, Clone, Default)]
pub struct CompareEngine {
    options: EngineOptions,
}

impl CompareEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    pub fn with_method(method: CompareMethod) -> Self {
        Self::new(EngineOptions {
            method,
            ..EngineOptions::default()
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn method(&self) -> CompareMethod {
        self.options.method
    }

    /// Produce a new DiffCode from `previous` and the provider's content.
    ///
    /// Existence flags are recomputed from scratch; compare and content flags
    /// are cleared first. Read failures are reported inside the
    /// [`Evaluation`]; only a side-count mismatch is returned as `Err`.
    pub fn evaluate(
        &self,
        arity: Arity,
        previous: DiffCode,
        provider: &dyn ContentProvider,
    ) -> Result<Evaluation, TricmpError> {
        if let Err(err) = arity.check(provider.side_count()) {
            error!("Refusing to evaluate: {}", err);
            return Err(err);
        }

        let mut code = previous;
        code.set_all_existence(arity);
        code.clear_compare_flags();

        let mut sides = vec![SideData::default(); arity.count()];
        let mut failures = Vec::new();

        for side in arity.sides() {
            if !provider.exists(side) {
                code.clear_existence(side);
                continue;
            }
            match self.read_side_metadata(provider, side) {
                Ok((size, modified)) => {
                    let data = &mut sides[side.index()];
                    data.exists = true;
                    data.size = size;
                    data.modified = modified;
                }
                Err(err) => {
                    warn!("Side {} unavailable: {}", side, err);
                    code.clear_existence(side);
                    failures.push(err);
                }
            }
        }

        if self.options.method.reads_content() {
            let present: Vec<Side> = arity.sides().filter(|s| code.exists(*s)).collect();
            for side in present {
                match self.sample(provider, side) {
                    Ok((binary, partial)) => {
                        let data = &mut sides[side.index()];
                        data.binary = binary;
                        data.partial_hash = Some(partial);
                        if binary {
                            code.set_binary(side);
                        }
                    }
                    Err(err) => {
                        warn!("Side {} unreadable: {}", side, err);
                        code.clear_existence(side);
                        sides[side.index()].exists = false;
                        failures.push(err);
                    }
                }
            }
        }

        if !failures.is_empty() {
            code.set_result(CompareResult::Error);
            return Ok(Evaluation {
                code,
                sides,
                failures,
            });
        }

        let result = if code.exist_all(arity) {
            self.compare_all(arity, provider, &sides)
        } else {
            // A unique item cannot differ from nothing
            Ok(CompareResult::Same)
        };

        match result {
            Ok(result) => code.set_result(result),
            Err(err) => {
                warn!("Comparison failed: {}", err);
                code.set_result(CompareResult::Error);
                failures.push(err);
            }
        }

        debug!(
            "Evaluated {} of {} sides present: {:?}{}",
            code.existing_count(arity),
            arity.count(),
            code.result(),
            if code.is_binary() { " (binary)" } else { "" }
        );

        Ok(Evaluation {
            code,
            sides,
            failures,
        })
    }

    fn read_side_metadata(
        &self,
        provider: &dyn ContentProvider,
        side: Side,
    ) -> Result<(u64, Option<SystemTime>), TricmpError> {
        let size = provider.length(side)?;
        let modified = provider.modified(side)?;
        let needs_date = matches!(
            self.options.method,
            CompareMethod::ByDate | CompareMethod::BySizeAndDate
        );
        if needs_date && modified.is_none() {
            return Err(TricmpError::ContentUnavailable {
                side: side.index(),
                reason: "no modification time available".to_string(),
            });
        }
        Ok((size, modified))
    }

    /// Read the head of a side; classify it and digest it for the partial cache
    fn sample(
        &self,
        provider: &dyn ContentProvider,
        side: Side,
    ) -> Result<(bool, Blake3Hash), TricmpError> {
        let sample = provider.read(side, 0, self.options.sample_size)?;
        Ok((looks_binary(&sample), blake3::hash(&sample).into()))
    }

    fn compare_all(
        &self,
        arity: Arity,
        provider: &dyn ContentProvider,
        sides: &[SideData],
    ) -> Result<CompareResult, TricmpError> {
        match self.options.method {
            CompareMethod::BySize => Ok(result_of(sizes_equal(sides))),
            CompareMethod::ByDate => Ok(result_of(self.dates_equal(sides))),
            CompareMethod::BySizeAndDate => {
                Ok(result_of(sizes_equal(sides) && self.dates_equal(sides)))
            }
            CompareMethod::ByContent => {
                let any_binary = sides.iter().any(|s| s.binary);
                if self.options.text.is_active() && !any_binary {
                    self.compare_lines(arity, provider)
                } else {
                    self.compare_bytes(arity, provider, sides)
                }
            }
        }
    }

    fn dates_equal(&self, sides: &[SideData]) -> bool {
        let tolerance = self.options.time_tolerance;
        let first = sides[0].modified;
        sides[1..].iter().all(|s| match (first, s.modified) {
            (Some(a), Some(b)) => {
                let delta = a.duration_since(b).unwrap_or_else(|e| e.duration());
                delta <= tolerance
            }
            _ => false,
        })
    }

    fn compare_bytes(
        &self,
        arity: Arity,
        provider: &dyn ContentProvider,
        sides: &[SideData],
    ) -> Result<CompareResult, TricmpError> {
        if !sizes_equal(sides) {
            return Ok(CompareResult::Different);
        }
        // Equal sizes mean equal sample lengths, so the partial digests are comparable
        if sides[1..].iter().any(|s| s.partial_hash != sides[0].partial_hash) {
            return Ok(CompareResult::Different);
        }
        let size = sides[0].size;
        if size <= self.options.sample_size as u64 {
            return Ok(CompareResult::Same);
        }

        let fingerprints = arity
            .sides()
            .map(|side| provider.fingerprint(side))
            .collect::<Result<Vec<_>, _>>()?;
        if fingerprints.iter().all(Option::is_some) {
            let first = fingerprints[0];
            return Ok(result_of(fingerprints[1..].iter().all(|f| *f == first)));
        }

        let chunk = self.options.chunk_size.max(1);
        let mut offset = self.options.sample_size as u64;
        while offset < size {
            let reference = provider.read(Side::FIRST, offset, chunk)?;
            if reference.is_empty() {
                break;
            }
            for side in arity.sides().skip(1) {
                if provider.read(side, offset, chunk)? != reference {
                    return Ok(CompareResult::Different);
                }
            }
            offset += reference.len() as u64;
        }
        Ok(CompareResult::Same)
    }

    fn compare_lines(
        &self,
        arity: Arity,
        provider: &dyn ContentProvider,
    ) -> Result<CompareResult, TricmpError> {
        let reference = self.read_lines(provider, Side::FIRST)?;
        for side in arity.sides().skip(1) {
            if self.read_lines(provider, side)? != reference {
                return Ok(CompareResult::Different);
            }
        }
        Ok(CompareResult::Same)
    }

    fn read_lines(
        &self,
        provider: &dyn ContentProvider,
        side: Side,
    ) -> Result<Vec<String>, TricmpError> {
        let len = provider.length(side)?;
        let bytes = provider.read(side, 0, len as usize)?;
        Ok(self.options.text.normalize(&bytes))
    }
}

fn sizes_equal(sides: &[SideData]) -> bool {
    sides[1..].iter().all(|s| s.size == sides[0].size)
}

fn result_of(same: bool) -> CompareResult {
    if same {
        CompareResult::Same
    } else {
        CompareResult::Different
    }
}
