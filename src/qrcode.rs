//! QR Code Model 2 symbol encoding.
//!
//! Turns a text payload into a [`ModuleGrid`]: a square matrix of dark and light modules.
//! Versions 1 to 40 are supported, with numeric, alphanumeric and byte segments and automatic
//! mask selection. The smallest version that holds the payload at the requested
//! [`EcLevel`] is chosen; the level itself is never raised behind the caller's back, so a
//! watermark sized for the requested level keeps its error budget.
//!
//! # Example
//!
//! ```rust
//! use qrkeep::qrcode::{encode, EcLevel};
//!
//! let grid = encode("Hello, world!", EcLevel::Medium).unwrap();
//! assert_eq!(grid.dimension(), 21);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error correction level of a symbol.
///
/// Higher levels spend more codewords on Reed-Solomon redundancy, so the same content needs a
/// larger version. Parsed from `L`, `M`, `Q`, `H` (or the full names, any case) and serialized
/// as the single letter.
///
/// # Example
///
/// ```rust
/// use qrkeep::qrcode::EcLevel;
///
/// let level: EcLevel = "q".parse().unwrap();
/// assert_eq!(level, EcLevel::Quartile);
/// assert_eq!(level.to_string(), "Q");
/// assert_eq!(EcLevel::default(), EcLevel::Medium);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub enum EcLevel {
    /// Tolerates ~7% erroneous codewords.
    #[serde(rename = "L")]
    Low,
    /// Tolerates ~15% erroneous codewords.
    #[default]
    #[serde(rename = "M")]
    Medium,
    /// Tolerates ~25% erroneous codewords.
    #[serde(rename = "Q")]
    Quartile,
    /// Tolerates ~30% erroneous codewords.
    #[serde(rename = "H")]
    High,
}

impl EcLevel {
    /// Row index into the per-level capacity tables.
    fn ordinal(self) -> usize {
        match self {
            EcLevel::Low => 0,
            EcLevel::Medium => 1,
            EcLevel::Quartile => 2,
            EcLevel::High => 3,
        }
    }

    /// The two level bits written into the format information.
    fn format_bits(self) -> u32 {
        match self {
            EcLevel::Low => 1,
            EcLevel::Medium => 0,
            EcLevel::Quartile => 3,
            EcLevel::High => 2,
        }
    }

    /// The conventional single-letter name of the level.
    pub fn letter(self) -> char {
        match self {
            EcLevel::Low => 'L',
            EcLevel::Medium => 'M',
            EcLevel::Quartile => 'Q',
            EcLevel::High => 'H',
        }
    }
}

impl fmt::Display for EcLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for EcLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L" | "LOW" => Ok(EcLevel::Low),
            "M" | "MEDIUM" => Ok(EcLevel::Medium),
            "Q" | "QUARTILE" => Ok(EcLevel::Quartile),
            "H" | "HIGH" => Ok(EcLevel::High),
            other => Err(format!("unknown error correction level '{other}' (expected L, M, Q or H)")),
        }
    }
}

/// Reasons a payload cannot become a symbol.
///
/// Returned by [`encode`] and by the renderer. Callers are expected to report these back to
/// whoever supplied the content so it can be shortened or the level lowered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Nothing to encode.
    #[error("content is empty")]
    EmptyContent,

    /// The requested pixel size was zero.
    #[error("symbol size must be greater than zero")]
    ZeroSize,

    /// The payload does not fit in version 40 at the requested level.
    #[error("content needs {needed} bits but level {level} holds at most {capacity} bits")]
    DataOverCapacity {
        needed: usize,
        capacity: usize,
        level: EcLevel,
    },

    /// The character count overflows the count field of every version.
    #[error("content has too many characters for any symbol version")]
    SegmentTooLong,
}

/// An immutable square grid of modules produced by [`encode`].
///
/// The grid includes the finder, timing and alignment patterns plus format and version
/// information, but no quiet zone; renderers add that themselves.
///
/// # Example
///
/// ```rust
/// use qrkeep::qrcode::{encode, EcLevel};
///
/// let grid = encode("https://example.com", EcLevel::Medium).unwrap();
/// assert_eq!(grid.version(), 2);
/// assert_eq!(grid.dimension(), 25);
/// // Top-left corner of the top-left finder pattern
/// assert!(grid.is_dark(0, 0));
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModuleGrid {
    dimension: usize,
    version: u8,
    level: EcLevel,
    mask: u8,
    modules: Vec<bool>,
}

impl ModuleGrid {
    /// Width and height in modules, between 21 and 177.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Symbol version, between 1 and 40.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The error correction level the grid was encoded at, exactly as requested.
    pub fn level(&self) -> EcLevel {
        self.level
    }

    /// The data mask pattern (0 to 7) chosen by penalty scoring.
    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// Returns `true` for a dark module. Coordinates outside the grid are light.
    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        x < self.dimension && y < self.dimension && self.modules[y * self.dimension + x]
    }

    /// Renders the grid as block characters, two per module so the output stays square in a
    /// terminal, surrounded by `border` light modules.
    ///
    /// # Arguments
    ///
    /// * `border` - Width of the light margin in modules. Scanners expect at least 2.
    ///
    /// # Example
    ///
    /// ```rust
    /// use qrkeep::qrcode::{encode, EcLevel};
    ///
    /// let grid = encode("hi", EcLevel::Low).unwrap();
    /// let text = grid.to_text(2);
    /// assert_eq!(text.lines().count(), grid.dimension() + 4);
    /// ```
    pub fn to_text(&self, border: usize) -> String {
        let span = self.dimension + 2 * border;
        let mut out = String::with_capacity(span * (span * 2 * 3 + 1));
        for y in 0..span {
            for x in 0..span {
                let dark = x >= border
                    && y >= border
                    && self.is_dark(x - border, y - border);
                out.push_str(if dark { "██" } else { "  " });
            }
            out.push('\n');
        }
        out
    }
}

/// Encodes `content` at `level` into the smallest fitting symbol.
///
/// The densest single mode that covers the whole text is used: numeric for digits only,
/// alphanumeric for the 45-character QR set, and UTF-8 bytes otherwise. The mask with the
/// lowest penalty score is applied.
///
/// The result depends only on `(content, level)`: encoding the same pair twice yields equal
/// grids.
///
/// # Arguments
///
/// * `content` - The text to encode. Must not be empty.
/// * `level` - Error correction level. Never raised automatically.
///
/// # Errors
///
/// * [`EncodingError::EmptyContent`] for an empty string.
/// * [`EncodingError::DataOverCapacity`] when even version 40 is too small at `level`.
/// * [`EncodingError::SegmentTooLong`] when no version's character count field is wide enough.
///
/// # Example
///
/// ```rust
/// use qrkeep::qrcode::{encode, EcLevel, EncodingError};
///
/// let grid = encode("Hello, world!", EcLevel::Medium).unwrap();
/// assert_eq!(grid.dimension(), 21);
///
/// assert_eq!(encode("", EcLevel::Low), Err(EncodingError::EmptyContent));
/// ```
pub fn encode(content: &str, level: EcLevel) -> Result<ModuleGrid, EncodingError> {
    if content.is_empty() {
        return Err(EncodingError::EmptyContent);
    }
    let segment = Segment::from_text(content);

    let mut chosen = None;
    let mut last_needed = None;
    for version in MIN_VERSION..=MAX_VERSION {
        let capacity = data_codewords(version, level) * 8;
        if let Some(needed) = segment.total_bits(version) {
            if needed <= capacity {
                chosen = Some((version, capacity));
                break;
            }
            last_needed = Some((needed, capacity));
        }
    }
    let (version, capacity) = match (chosen, last_needed) {
        (Some(found), _) => found,
        (None, Some((needed, capacity))) => {
            return Err(EncodingError::DataOverCapacity {
                needed,
                capacity,
                level,
            })
        }
        (None, None) => return Err(EncodingError::SegmentTooLong),
    };

    let mut bits = BitBuffer::default();
    bits.push(segment.mode.indicator(), 4);
    bits.push(segment.num_chars as u32, segment.mode.char_count_bits(version));
    bits.extend(&segment.data);

    // Terminator, byte alignment, then alternating pad codewords
    let terminator = (capacity - bits.len()).min(4);
    bits.push(0, terminator as u8);
    let align = (8 - bits.len() % 8) % 8;
    bits.push(0, align as u8);
    for pad in [0xEC_u32, 0x11].iter().cycle() {
        if bits.len() >= capacity {
            break;
        }
        bits.push(*pad, 8);
    }

    let codewords = add_ecc_and_interleave(&bits.to_bytes(), version, level);

    let mut symbol = Symbol::new(version, level);
    symbol.draw_function_patterns();
    symbol.draw_codewords(&codewords);

    let mut best = (0u8, i32::MAX);
    for mask in 0..8u8 {
        symbol.apply_mask(mask);
        symbol.draw_format_bits(mask);
        let penalty = symbol.penalty_score();
        if penalty < best.1 {
            best = (mask, penalty);
        }
        // XOR again to undo
        symbol.apply_mask(mask);
    }
    let mask = best.0;
    symbol.apply_mask(mask);
    symbol.draw_format_bits(mask);

    Ok(ModuleGrid {
        dimension: symbol.size,
        version,
        level,
        mask,
        modules: symbol.modules,
    })
}

/// The smallest symbol version, 21x21 modules.
const MIN_VERSION: u8 = 1;
/// The largest symbol version, 177x177 modules.
const MAX_VERSION: u8 = 40;

/// Segment encoding mode. Kanji and ECI are not produced by the encoder.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    Numeric,
    Alphanumeric,
    Byte,
}

impl Mode {
    /// The 4-bit mode indicator that starts a segment.
    fn indicator(self) -> u32 {
        match self {
            Mode::Numeric => 0x1,
            Mode::Alphanumeric => 0x2,
            Mode::Byte => 0x4,
        }
    }

    /// Width of the character count field, which grows with the version.
    fn char_count_bits(self, version: u8) -> u8 {
        let widths = match self {
            Mode::Numeric => [10, 12, 14],
            Mode::Alphanumeric => [9, 11, 13],
            Mode::Byte => [8, 16, 16],
        };
        widths[usize::from((version + 7) / 17)]
    }
}

/// The 45 characters representable in alphanumeric mode, in code order.
static ALPHANUMERIC_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ $%*+-./:";

/// A single data segment covering the whole payload.
struct Segment {
    mode: Mode,
    num_chars: usize,
    data: BitBuffer,
}

impl Segment {
    /// Picks the densest single mode that can represent the whole text.
    fn from_text(text: &str) -> Self {
        if text.bytes().all(|b| b.is_ascii_digit()) {
            let mut data = BitBuffer::default();
            for chunk in text.as_bytes().chunks(3) {
                let value = chunk.iter().fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
                data.push(value, chunk.len() as u8 * 3 + 1);
            }
            Segment {
                mode: Mode::Numeric,
                num_chars: text.len(),
                data,
            }
        } else if text.chars().all(|c| ALPHANUMERIC_CHARSET.contains(c)) {
            let mut data = BitBuffer::default();
            let indices: Vec<u32> = text
                .chars()
                .filter_map(|c| ALPHANUMERIC_CHARSET.find(c))
                .map(|i| i as u32)
                .collect();
            for pair in indices.chunks(2) {
                match pair {
                    [a, b] => data.push(a * 45 + b, 11),
                    [a] => data.push(*a, 6),
                    _ => unreachable!(),
                }
            }
            Segment {
                mode: Mode::Alphanumeric,
                num_chars: text.len(),
                data,
            }
        } else {
            let mut data = BitBuffer::default();
            for b in text.bytes() {
                data.push(u32::from(b), 8);
            }
            Segment {
                mode: Mode::Byte,
                num_chars: text.len(),
                data,
            }
        }
    }

    /// Bits needed at `version`, or `None` when the character count overflows its field.
    fn total_bits(&self, version: u8) -> Option<usize> {
        let ccbits = self.mode.char_count_bits(version);
        if self.num_chars >= 1usize << ccbits {
            return None;
        }
        Some(4 + usize::from(ccbits) + self.data.len())
    }
}

/// Growable big-endian bit sequence.
#[derive(Default)]
struct BitBuffer(Vec<bool>);

impl BitBuffer {
    /// Appends the low `len` bits of `value`, most significant first.
    fn push(&mut self, value: u32, len: u8) {
        debug_assert!(len <= 31 && value >> len == 0);
        for i in (0..len).rev() {
            self.0.push((value >> i) & 1 != 0);
        }
    }

    fn extend(&mut self, other: &BitBuffer) {
        self.0.extend_from_slice(&other.0);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    /// Packs the bits into bytes. The length must already be a multiple of 8.
    fn to_bytes(&self) -> Vec<u8> {
        self.0
            .chunks(8)
            .map(|bits| {
                bits.iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &bit)| acc | (u8::from(bit) << (7 - i)))
            })
            .collect()
    }
}

/// Working state while a symbol is being drawn.
struct Symbol {
    version: u8,
    level: EcLevel,
    size: usize,
    modules: Vec<bool>,
    function: Vec<bool>,
}

impl Symbol {
    /// An all-light symbol with nothing marked as a function module yet.
    fn new(version: u8, level: EcLevel) -> Self {
        let size = usize::from(version) * 4 + 17;
        Symbol {
            version,
            level,
            size,
            modules: vec![false; size * size],
            function: vec![false; size * size],
        }
    }

    fn get(&self, x: usize, y: usize) -> bool {
        self.modules[y * self.size + x]
    }

    fn set_function(&mut self, x: usize, y: usize, dark: bool) {
        let index = y * self.size + x;
        self.modules[index] = dark;
        self.function[index] = true;
    }

    /// Timing, finder and alignment patterns plus reserved format and version areas.
    fn draw_function_patterns(&mut self) {
        let size = self.size;
        for i in 0..size {
            self.set_function(6, i, i % 2 == 0);
            self.set_function(i, 6, i % 2 == 0);
        }

        self.draw_finder(3, 3);
        self.draw_finder(size as i32 - 4, 3);
        self.draw_finder(3, size as i32 - 4);

        let positions = alignment_positions(self.version);
        let last = positions.len().saturating_sub(1);
        for (i, &x) in positions.iter().enumerate() {
            for (j, &y) in positions.iter().enumerate() {
                let overlaps_finder =
                    (i == 0 && j == 0) || (i == 0 && j == last) || (i == last && j == 0);
                if !overlaps_finder {
                    self.draw_alignment(x, y);
                }
            }
        }

        // Reserve the format area; real bits are written once the mask is known
        self.draw_format_bits(0);
        self.draw_version();
    }

    /// Draws a 9x9 finder with separator centred on `(cx, cy)`, clipped to the symbol.
    fn draw_finder(&mut self, cx: i32, cy: i32) {
        for dy in -4i32..=4 {
            for dx in -4i32..=4 {
                let (x, y) = (cx + dx, cy + dy);
                if (0..self.size as i32).contains(&x) && (0..self.size as i32).contains(&y) {
                    let dist = dx.abs().max(dy.abs());
                    self.set_function(x as usize, y as usize, dist != 2 && dist != 4);
                }
            }
        }
    }

    /// Draws a 5x5 alignment pattern centred on `(cx, cy)`.
    fn draw_alignment(&mut self, cx: usize, cy: usize) {
        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                let x = (cx as i32 + dx) as usize;
                let y = (cy as i32 + dy) as usize;
                self.set_function(x, y, dx.abs().max(dy.abs()) != 1);
            }
        }
    }

    /// Writes the 15-bit BCH-protected level and mask, twice.
    fn draw_format_bits(&mut self, mask: u8) {
        let data = (self.level.format_bits() << 3) | u32::from(mask);
        let mut rem = data;
        for _ in 0..10 {
            rem = (rem << 1) ^ ((rem >> 9) * 0x537);
        }
        let bits = ((data << 10) | rem) ^ 0x5412;
        let bit = |i: usize| (bits >> i) & 1 != 0;

        // Copy around the top-left finder
        for i in 0..6 {
            self.set_function(8, i, bit(i));
        }
        self.set_function(8, 7, bit(6));
        self.set_function(8, 8, bit(7));
        self.set_function(7, 8, bit(8));
        for i in 9..15 {
            self.set_function(14 - i, 8, bit(i));
        }

        // Copy split between the other two finders
        let size = self.size;
        for i in 0..8 {
            self.set_function(size - 1 - i, 8, bit(i));
        }
        for i in 8..15 {
            self.set_function(8, size - 15 + i, bit(i));
        }
        self.set_function(8, size - 8, true);
    }

    /// Writes the 18-bit version information blocks, only present from version 7 up.
    fn draw_version(&mut self) {
        if self.version < 7 {
            return;
        }
        let version = u32::from(self.version);
        let mut rem = version;
        for _ in 0..12 {
            rem = (rem << 1) ^ ((rem >> 11) * 0x1F25);
        }
        let bits = (version << 12) | rem;
        for i in 0..18usize {
            let dark = (bits >> i) & 1 != 0;
            let a = self.size - 11 + i % 3;
            let b = i / 3;
            self.set_function(a, b, dark);
            self.set_function(b, a, dark);
        }
    }

    /// Places codeword bits in the two-column zigzag, skipping function modules.
    fn draw_codewords(&mut self, data: &[u8]) {
        let size = self.size as i32;
        let total_bits = data.len() * 8;
        let mut i = 0usize;
        let mut right = size - 1;
        while right >= 1 {
            if right == 6 {
                right = 5;
            }
            for vert in 0..size {
                for j in 0..2 {
                    let x = (right - j) as usize;
                    let upward = (right + 1) & 2 == 0;
                    let y = if upward { size - 1 - vert } else { vert } as usize;
                    let index = y * self.size + x;
                    if !self.function[index] && i < total_bits {
                        self.modules[index] = (data[i >> 3] >> (7 - (i & 7))) & 1 != 0;
                        i += 1;
                    }
                }
            }
            right -= 2;
        }
        debug_assert_eq!(i, total_bits);
    }

    /// XORs data modules with mask pattern `mask`. Applying the same mask twice undoes it.
    fn apply_mask(&mut self, mask: u8) {
        for y in 0..self.size {
            for x in 0..self.size {
                let index = y * self.size + x;
                if self.function[index] {
                    continue;
                }
                let (x, y) = (x as i32, y as i32);
                let invert = match mask {
                    0 => (x + y) % 2 == 0,
                    1 => y % 2 == 0,
                    2 => x % 3 == 0,
                    3 => (x + y) % 3 == 0,
                    4 => (x / 3 + y / 2) % 2 == 0,
                    5 => (x * y) % 2 + (x * y) % 3 == 0,
                    6 => ((x * y) % 2 + (x * y) % 3) % 2 == 0,
                    7 => ((x + y) % 2 + (x * y) % 3) % 2 == 0,
                    _ => unreachable!("mask out of range"),
                };
                self.modules[index] ^= invert;
            }
        }
    }

    /// Sum of the four penalty rules; lower is easier to scan.
    fn penalty_score(&self) -> i32 {
        let size = self.size;
        let mut result = 0;

        for horizontal in [true, false] {
            for a in 0..size {
                let mut run_color = false;
                let mut run_len = 0;
                let mut history = RunHistory::new(size);
                for b in 0..size {
                    let color = if horizontal { self.get(b, a) } else { self.get(a, b) };
                    if color == run_color {
                        run_len += 1;
                        if run_len == 5 {
                            result += PENALTY_N1;
                        } else if run_len > 5 {
                            result += 1;
                        }
                    } else {
                        history.add(run_len);
                        if !run_color {
                            result += history.count_patterns() * PENALTY_N3;
                        }
                        run_color = color;
                        run_len = 1;
                    }
                }
                result += history.terminate_and_count(run_color, run_len) * PENALTY_N3;
            }
        }

        for y in 0..size - 1 {
            for x in 0..size - 1 {
                let color = self.get(x, y);
                if color == self.get(x + 1, y)
                    && color == self.get(x, y + 1)
                    && color == self.get(x + 1, y + 1)
                {
                    result += PENALTY_N2;
                }
            }
        }

        let dark = self.modules.iter().filter(|&&m| m).count() as i32;
        let total = (size * size) as i32;
        let k = ((dark * 20 - total * 10).abs() + total - 1) / total - 1;
        result + k * PENALTY_N4
    }
}

/// Run-length history used to spot finder-like 1:1:3:1:1 patterns.
struct RunHistory {
    size: i32,
    runs: [i32; 7],
}

impl RunHistory {
    fn new(size: usize) -> Self {
        RunHistory {
            size: size as i32,
            runs: [0; 7],
        }
    }

    fn add(&mut self, mut run: i32) {
        if self.runs[0] == 0 {
            // Treat the light border outside the symbol as part of the first run
            run += self.size;
        }
        self.runs.copy_within(0..6, 1);
        self.runs[0] = run;
    }

    /// Finder-like 1:1:3:1:1 runs with four light modules on either side.
    fn count_patterns(&self) -> i32 {
        let r = &self.runs;
        let n = r[1];
        let core = n > 0 && r[2] == n && r[3] == n * 3 && r[4] == n && r[5] == n;
        i32::from(core && (r[0] >= n * 4 || r[6] >= n * 4))
    }

    /// Closes the final run of a row or column and counts patterns.
    fn terminate_and_count(mut self, run_color: bool, mut run: i32) -> i32 {
        if run_color {
            self.add(run);
            run = 0;
        }
        run += self.size;
        self.add(run);
        self.count_patterns()
    }
}

/// Penalty weights for runs, 2x2 blocks, finder-like patterns and dark balance.
const PENALTY_N1: i32 = 3;
const PENALTY_N2: i32 = 3;
const PENALTY_N3: i32 = 40;
const PENALTY_N4: i32 = 10;

/// Centre coordinates of alignment patterns along one axis, ascending.
fn alignment_positions(version: u8) -> Vec<usize> {
    if version == 1 {
        return Vec::new();
    }
    let version = usize::from(version);
    let count = version / 7 + 2;
    let step = if version == 32 {
        26
    } else {
        (version * 4 + count * 2 + 1) / (count * 2 - 2) * 2
    };
    let size = version * 4 + 17;
    let mut positions: Vec<usize> = (0..count - 1).map(|i| size - 7 - i * step).collect();
    positions.push(6);
    positions.reverse();
    positions
}

/// Modules available for data and ECC once function patterns are excluded.
fn raw_data_modules(version: u8) -> usize {
    let v = usize::from(version);
    let mut result = (16 * v + 128) * v + 64;
    if v >= 2 {
        let count = v / 7 + 2;
        result -= (25 * count - 10) * count - 55;
        if v >= 7 {
            result -= 36;
        }
    }
    result
}

fn table_get(table: &[[u8; 41]; 4], version: u8, level: EcLevel) -> usize {
    usize::from(table[level.ordinal()][usize::from(version)])
}

/// Data codewords available at `version` and `level`.
fn data_codewords(version: u8, level: EcLevel) -> usize {
    raw_data_modules(version) / 8
        - table_get(&ECC_CODEWORDS_PER_BLOCK, version, level)
            * table_get(&NUM_ERROR_CORRECTION_BLOCKS, version, level)
}

/// Splits data into blocks, appends Reed-Solomon ECC to each, and interleaves the result.
fn add_ecc_and_interleave(data: &[u8], version: u8, level: EcLevel) -> Vec<u8> {
    debug_assert_eq!(data.len(), data_codewords(version, level));
    let num_blocks = table_get(&NUM_ERROR_CORRECTION_BLOCKS, version, level);
    let ecc_len = table_get(&ECC_CODEWORDS_PER_BLOCK, version, level);
    let raw_codewords = raw_data_modules(version) / 8;
    let num_short = num_blocks - raw_codewords % num_blocks;
    let short_len = raw_codewords / num_blocks;
    let short_data_len = short_len - ecc_len;

    let divisor = reed_solomon_divisor(ecc_len);
    let mut blocks: Vec<Vec<u8>> = Vec::with_capacity(num_blocks);
    let mut offset = 0;
    for i in 0..num_blocks {
        let len = short_data_len + usize::from(i >= num_short);
        let chunk = &data[offset..offset + len];
        offset += len;
        let mut block = chunk.to_vec();
        if i < num_short {
            // Placeholder so every block has the same length
            block.push(0);
        }
        block.extend(reed_solomon_remainder(chunk, &divisor));
        blocks.push(block);
    }

    let mut result = Vec::with_capacity(raw_codewords);
    for i in 0..blocks[0].len() {
        for (j, block) in blocks.iter().enumerate() {
            if i != short_data_len || j >= num_short {
                result.push(block[i]);
            }
        }
    }
    debug_assert_eq!(result.len(), raw_codewords);
    result
}

/// Generator polynomial of the given degree, highest coefficient dropped.
fn reed_solomon_divisor(degree: usize) -> Vec<u8> {
    let mut divisor = vec![0u8; degree];
    divisor[degree - 1] = 1;
    let mut root: u8 = 1;
    for _ in 0..degree {
        for j in 0..degree {
            divisor[j] = gf_multiply(divisor[j], root);
            if j + 1 < degree {
                divisor[j] ^= divisor[j + 1];
            }
        }
        root = gf_multiply(root, 0x02);
    }
    divisor
}

/// Remainder of `data` divided by the generator; these are the ECC codewords.
fn reed_solomon_remainder(data: &[u8], divisor: &[u8]) -> Vec<u8> {
    let mut result = vec![0u8; divisor.len()];
    for &b in data {
        let factor = b ^ result[0];
        result.rotate_left(1);
        let last = result.len() - 1;
        result[last] = 0;
        for (x, &y) in result.iter_mut().zip(divisor) {
            *x ^= gf_multiply(y, factor);
        }
    }
    result
}

/// Multiplication in GF(2^8) modulo x^8 + x^4 + x^3 + x^2 + 1.
fn gf_multiply(x: u8, y: u8) -> u8 {
    let mut z: u8 = 0;
    for i in (0..8).rev() {
        z = (z << 1) ^ ((z >> 7) * 0x1D);
        z ^= ((y >> i) & 1) * x;
    }
    z
}

/// ECC codewords per block, indexed by level then version.
static ECC_CODEWORDS_PER_BLOCK: [[u8; 41]; 4] = [
    [
        0, 7, 10, 15, 20, 26, 18, 20, 24, 30, 18, 20, 24, 26, 30, 22, 24, 28, 30, 28, 28, 28, 28,
        30, 30, 26, 28, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    ],
    [
        0, 10, 16, 26, 18, 24, 16, 18, 22, 22, 26, 30, 22, 22, 24, 24, 28, 28, 26, 26, 26, 26, 28,
        28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28,
    ],
    [
        0, 13, 22, 18, 26, 18, 24, 18, 22, 20, 24, 28, 26, 24, 20, 30, 24, 28, 28, 26, 30, 28, 30,
        30, 30, 30, 28, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    ],
    [
        0, 17, 28, 22, 16, 22, 28, 26, 26, 24, 28, 24, 28, 22, 24, 24, 30, 28, 28, 26, 28, 30, 24,
        30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30, 30,
    ],
];

/// Number of ECC blocks, indexed by level then version.
static NUM_ERROR_CORRECTION_BLOCKS: [[u8; 41]; 4] = [
    [
        0, 1, 1, 1, 1, 1, 2, 2, 2, 2, 4, 4, 4, 4, 4, 6, 6, 6, 6, 7, 8, 8, 9, 9, 10, 12, 12, 12,
        13, 14, 15, 16, 17, 18, 19, 19, 20, 21, 22, 24, 25,
    ],
    [
        0, 1, 1, 1, 2, 2, 4, 4, 4, 5, 5, 5, 8, 9, 9, 10, 10, 11, 13, 14, 16, 17, 17, 18, 20, 21,
        23, 25, 26, 28, 29, 31, 33, 35, 37, 38, 40, 43, 45, 47, 49,
    ],
    [
        0, 1, 1, 2, 2, 4, 4, 6, 6, 8, 8, 8, 10, 12, 16, 12, 17, 16, 18, 21, 20, 23, 23, 25, 27,
        29, 34, 34, 35, 38, 40, 43, 45, 48, 51, 53, 56, 59, 62, 65, 68,
    ],
    [
        0, 1, 1, 2, 4, 4, 4, 5, 6, 8, 8, 11, 11, 16, 16, 18, 16, 19, 21, 25, 25, 25, 34, 30, 32,
        35, 37, 40, 42, 45, 48, 51, 54, 57, 60, 63, 66, 70, 74, 77, 81,
    ],
];

#[cfg(test)]
mod tests {
    use super::*;

    fn format_bit(grid: &ModuleGrid, i: usize) -> u32 {
        // Bits 9..14 of the first copy sit on row 8, columns 5 down to 0
        u32::from(grid.is_dark(14 - i, 8))
    }

    #[test]
    fn test_dimension_grows_with_content() {
        let small = encode("Hello, world!", EcLevel::Medium).unwrap();
        assert_eq!(small.dimension(), 21);
        assert_eq!(small.version(), 1);

        let url = encode("https://example.com", EcLevel::Medium).unwrap();
        assert_eq!(url.dimension(), 25);
        assert_eq!(url.version(), 2);
    }

    #[test]
    fn test_level_is_not_boosted() {
        let grid = encode("1", EcLevel::Low).unwrap();
        assert_eq!(grid.level(), EcLevel::Low);

        let level_bits = (format_bit(&grid, 14) << 1) | format_bit(&grid, 13);
        assert_eq!(level_bits ^ 0b10, EcLevel::Low.format_bits());
        let mask_bits =
            (format_bit(&grid, 12) << 2) | (format_bit(&grid, 11) << 1) | format_bit(&grid, 10);
        assert_eq!(mask_bits ^ 0b101, u32::from(grid.mask()));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = encode("https://example.com", EcLevel::Quartile).unwrap();
        let b = encode("https://example.com", EcLevel::Quartile).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_function_patterns() {
        let grid = encode("HELLO WORLD", EcLevel::High).unwrap();
        let last = grid.dimension() - 1;
        // Finder corners and their light ring
        assert!(grid.is_dark(0, 0));
        assert!(grid.is_dark(2, 2));
        assert!(!grid.is_dark(1, 1));
        assert!(grid.is_dark(last, 0));
        assert!(grid.is_dark(0, last));
        // Separator
        assert!(!grid.is_dark(7, 0));
        // Timing pattern
        assert!(grid.is_dark(6, 8));
        assert!(!grid.is_dark(6, 9));
        // Always-dark module
        assert!(grid.is_dark(8, grid.dimension() - 8));
        // Out of range reads as light
        assert!(!grid.is_dark(last + 1, 0));
    }

    #[test]
    fn test_numeric_capacity_limit() {
        let fits = "7".repeat(7089);
        let grid = encode(&fits, EcLevel::Low).unwrap();
        assert_eq!(grid.version(), 40);
        assert_eq!(grid.dimension(), 177);

        let too_long = "7".repeat(7090);
        assert!(matches!(
            encode(&too_long, EcLevel::Low),
            Err(EncodingError::DataOverCapacity { .. })
        ));
    }

    #[test]
    fn test_byte_overflow_at_high_level() {
        let payload = "x".repeat(3000);
        let err = encode(&payload, EcLevel::High).unwrap_err();
        assert!(matches!(err, EncodingError::DataOverCapacity { level: EcLevel::High, .. }));
    }

    #[test]
    fn test_empty_content_rejected() {
        assert_eq!(encode("", EcLevel::Medium), Err(EncodingError::EmptyContent));
    }

    #[test]
    fn test_segment_mode_selection() {
        assert_eq!(Segment::from_text("1234567890").mode, Mode::Numeric);
        assert_eq!(Segment::from_text("HELLO WORLD").mode, Mode::Alphanumeric);
        assert_eq!(Segment::from_text("Hello World").mode, Mode::Byte);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("q".parse::<EcLevel>().unwrap(), EcLevel::Quartile);
        assert_eq!("High".parse::<EcLevel>().unwrap(), EcLevel::High);
        assert!("X".parse::<EcLevel>().is_err());
        assert_eq!(EcLevel::default().to_string(), "M");
    }

    #[test]
    fn test_text_preview_has_border() {
        let grid = encode("A", EcLevel::Low).unwrap();
        let text = grid.to_text(2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), grid.dimension() + 4);
        assert!(lines[0].chars().all(|c| c == ' '));
        assert!(lines[2].starts_with("    ██"));
    }
}
