use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use globwalk::GlobWalkerBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_INPUT_DIR: &str = "ocr";
pub const DEFAULT_OUTPUT: &str = "tool_materials.jsonl";
pub const DEFAULT_CONFIG: &str = "toolmat.yaml";

const FIRST_PAGE_FIELDS: [&str; 6] = [
    "Base Durability",
    "Handle Modifier",
    "Full Durability",
    "Mining Speed",
    "Mining Level",
    "Attack",
];

const SECOND_PAGE_FIELDS: [&str; 4] = ["Draw Speed", "Arrow Speed", "Weight", "Break Chance"];

const REINFORCED_PREFIX: &str = "Reinforced";

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("MissingDirectory: {}", path.display())]
    MissingDirectory { path: PathBuf },
    #[error("UnexpectedName: position {position} should be {expected}.txt, found {found}")]
    NotExpected { position: usize, expected: String, found: String },
    #[error("OddFileCount: {count} pages cannot be paired")]
    OddFileCount { count: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("EmptyPage")]
    EmptyPage,
    #[error("MissingHeader: expected {expected:?}, found {found:?}")]
    MissingHeader { expected: String, found: String },
    #[error("BadFooter: expected {expected:?}, found {found:?}")]
    BadFooter { expected: String, found: String },
    #[error("MissingField: expected {field:?} prefix in {line:?}")]
    MissingField { field: String, line: String },
    #[error("TooShort: expected at least {expected} body lines, found {found}")]
    TooShort { expected: usize, found: usize },
    #[error("LineCount: expected {expected} body lines, found {found}")]
    LineCount { expected: usize, found: usize },
    #[error("MissingBowHeader: expected {expected:?}, found {found:?}")]
    MissingBowHeader { expected: String, found: String },
    #[error("AmbiguousTrait: {kind} appears {} times: {lines:?}", lines.len())]
    AmbiguousTrait { kind: &'static str, lines: Vec<String> },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("WriteFailed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("ConfigError: {0}")]
    Config(#[from] ConfigError),
    #[error("NamingError: {0}")]
    Naming(#[from] NamingError),
    #[error("FormatError in {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    #[error("ReadFailed: {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Emit(#[from] EmitError),
}

impl ConvertError {
    /// Process exit status for this failure kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConvertError::Config(_) => 3,
            ConvertError::Naming(_) => 4,
            ConvertError::Format { .. } | ConvertError::Read { .. } => 5,
            ConvertError::Emit(_) => 6,
        }
    }
}

/// Sentinel strings that frame every OCR page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageLayout {
    pub header: String,
    pub total_pages: u32,
    pub bow_header: String,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            header: "Tool Materials".to_string(),
            total_pages: 134,
            bow_header: "Bow & Arrow".to_string(),
        }
    }
}

impl PageLayout {
    pub fn footer_for(&self, index: usize) -> String {
        format!("Page {}/{}", index, self.total_pages)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvertConfig {
    #[serde(default)]
    pub input_dir: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub atomic: Option<bool>,
    #[serde(default)]
    pub layout: PageLayout,
}

impl ConvertConfig {
    pub fn input_dir(&self) -> String {
        self.input_dir.clone().unwrap_or_else(|| DEFAULT_INPUT_DIR.to_string())
    }
    pub fn output(&self) -> String {
        self.output.clone().unwrap_or_else(|| DEFAULT_OUTPUT.to_string())
    }
    pub fn atomic(&self) -> bool {
        self.atomic.unwrap_or(true)
    }
}

/// Read and validate a YAML config file.
pub fn load_config(path: &Path) -> Result<ConvertConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let cfg: ConvertConfig = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if cfg.layout.header.trim().is_empty() {
        return Err(ConfigError::Invalid("layout.header is empty".into()));
    }
    if cfg.layout.bow_header.trim().is_empty() {
        return Err(ConfigError::Invalid("layout.bow_header is empty".into()));
    }
    if cfg.layout.total_pages == 0 {
        return Err(ConfigError::Invalid("layout.total_pages must be at least 1".into()));
    }
    if matches!(cfg.output.as_deref(), Some(o) if o.trim().is_empty()) {
        return Err(ConfigError::Invalid("output is empty".into()));
    }

    Ok(cfg)
}

/// One OCR dump file and its 1-based position in the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub index: usize,
    pub path: PathBuf,
}

/// List `*.txt` pages in `dir`, sorted by name.
/// Every file at position i (1-based) must be named `{i:03}.txt`, so a
/// missing, extra or misnamed page fails before anything is parsed.
pub fn enumerate_inputs(dir: &Path) -> Result<Vec<InputFile>, NamingError> {
    if !dir.is_dir() {
        return Err(NamingError::MissingDirectory { path: dir.to_path_buf() });
    }

    let mut paths: Vec<PathBuf> = GlobWalkerBuilder::from_patterns(dir, &["*.txt"])
        .case_insensitive(false)
        .follow_links(false)
        .max_depth(1)
        .build()
        .map_err(|_| NamingError::MissingDirectory { path: dir.to_path_buf() })?
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.is_file())
        .collect();

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut files = Vec::with_capacity(paths.len());
    for (i, path) in paths.into_iter().enumerate() {
        let index = i + 1;
        let expected = format!("{:03}", index);
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        if stem != expected {
            let found = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            return Err(NamingError::NotExpected { position: index, expected, found });
        }
        files.push(InputFile { index, path });
    }

    Ok(files)
}

/// Check header and footer sentinels and return the body between them.
pub fn split_page_lines(lines: &[String], index: usize, layout: &PageLayout) -> Result<Vec<String>, FormatError> {
    let (first, last) = match (lines.first(), lines.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(FormatError::EmptyPage),
    };
    if *first != layout.header {
        return Err(FormatError::MissingHeader { expected: layout.header.clone(), found: first.clone() });
    }
    let footer = layout.footer_for(index);
    // a one-line page has its header in the footer slot
    if lines.len() < 2 || *last != footer {
        return Err(FormatError::BadFooter { expected: footer, found: last.clone() });
    }
    Ok(lines[1..lines.len() - 1].to_vec())
}

/// Read one page file as trimmed lines, with header and footer removed.
pub fn read_page_lines(file: &InputFile, layout: &PageLayout) -> Result<Vec<String>, ConvertError> {
    let raw = std::fs::read_to_string(&file.path)
        .map_err(|source| ConvertError::Read { path: file.path.clone(), source })?;
    let lines: Vec<String> = raw.lines().map(|l| l.trim().to_string()).collect();
    split_page_lines(&lines, file.index, layout).map_err(|source| ConvertError::Format { path: file.path.clone(), source })
}

/// Strip the `"{field_name}: "` prefix from `line` and return the trimmed value.
pub fn parse_field(field_name: &str, line: &str) -> Result<String, FormatError> {
    let prefix = format!("{}: ", field_name);
    match line.strip_prefix(prefix.as_str()) {
        Some(rest) => Ok(rest.trim().to_string()),
        None => Err(FormatError::MissingField { field: field_name.to_string(), line: line.to_string() }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Base Durability")]
    pub base_durability: String,
    #[serde(rename = "Handle Modifier")]
    pub handle_modifier: String,
    #[serde(rename = "Full Durability")]
    pub full_durability: String,
    #[serde(rename = "Mining Speed")]
    pub mining_speed: String,
    #[serde(rename = "Mining Level")]
    pub mining_level: String,
    #[serde(rename = "Attack")]
    pub attack: String,
    #[serde(rename = "Reinforced Level", default, skip_serializing_if = "Option::is_none")]
    pub reinforced_level: Option<String>,
    #[serde(rename = "Trait", default, skip_serializing_if = "Option::is_none")]
    pub trait_line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondPageFields {
    #[serde(rename = "Draw Speed")]
    pub draw_speed: String,
    #[serde(rename = "Arrow Speed")]
    pub arrow_speed: String,
    #[serde(rename = "Weight")]
    pub weight: String,
    #[serde(rename = "Break Chance")]
    pub break_chance: String,
}

/// One output line: first-page stats followed by the bow & arrow stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRecord {
    #[serde(flatten)]
    pub page: PageRecord,
    #[serde(flatten)]
    pub bow: SecondPageFields,
}

fn at_most_one(kind: &'static str, lines: Vec<String>) -> Result<Option<String>, FormatError> {
    match lines.len() {
        0 => Ok(None),
        1 => Ok(lines.into_iter().next()),
        _ => Err(FormatError::AmbiguousTrait { kind, lines }),
    }
}

/// Parse a material stat block body (header and footer already removed).
/// Line 0 is the name, lines 1..=6 the fixed fields, anything after is a
/// trait line kept verbatim.
pub fn parse_first_page_lines(body: &[String]) -> Result<PageRecord, FormatError> {
    let min = 1 + FIRST_PAGE_FIELDS.len();
    if body.len() < min {
        return Err(FormatError::TooShort { expected: min, found: body.len() });
    }

    let (reinforced, other): (Vec<String>, Vec<String>) =
        body[min..].iter().cloned().partition(|l| l.starts_with(REINFORCED_PREFIX));

    Ok(PageRecord {
        name: body[0].clone(),
        base_durability: parse_field(FIRST_PAGE_FIELDS[0], &body[1])?,
        handle_modifier: parse_field(FIRST_PAGE_FIELDS[1], &body[2])?,
        full_durability: parse_field(FIRST_PAGE_FIELDS[2], &body[3])?,
        mining_speed: parse_field(FIRST_PAGE_FIELDS[3], &body[4])?,
        mining_level: parse_field(FIRST_PAGE_FIELDS[4], &body[5])?,
        attack: parse_field(FIRST_PAGE_FIELDS[5], &body[6])?,
        reinforced_level: at_most_one("Reinforced Level", reinforced)?,
        trait_line: at_most_one("Trait", other)?,
    })
}

/// Parse a bow & arrow stat block body (header and footer already removed).
pub fn parse_second_page_lines(body: &[String], layout: &PageLayout) -> Result<SecondPageFields, FormatError> {
    let expected = 1 + SECOND_PAGE_FIELDS.len();
    if body.len() != expected {
        return Err(FormatError::LineCount { expected, found: body.len() });
    }
    if body[0] != layout.bow_header {
        return Err(FormatError::MissingBowHeader { expected: layout.bow_header.clone(), found: body[0].clone() });
    }

    Ok(SecondPageFields {
        draw_speed: parse_field(SECOND_PAGE_FIELDS[0], &body[1])?,
        arrow_speed: parse_field(SECOND_PAGE_FIELDS[1], &body[2])?,
        weight: parse_field(SECOND_PAGE_FIELDS[2], &body[3])?,
        break_chance: parse_field(SECOND_PAGE_FIELDS[3], &body[4])?,
    })
}

pub fn parse_first_page(file: &InputFile, layout: &PageLayout) -> Result<PageRecord, ConvertError> {
    let body = read_page_lines(file, layout)?;
    parse_first_page_lines(&body).map_err(|source| ConvertError::Format { path: file.path.clone(), source })
}

pub fn parse_second_page(file: &InputFile, layout: &PageLayout) -> Result<SecondPageFields, ConvertError> {
    let body = read_page_lines(file, layout)?;
    parse_second_page_lines(&body, layout).map_err(|source| ConvertError::Format { path: file.path.clone(), source })
}

/// Merge a first page with its paired second page.
pub fn merge_pages(page: PageRecord, bow: SecondPageFields) -> MaterialRecord {
    MaterialRecord { page, bow }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertSummary {
    pub records: usize,
    pub output: String,
    pub sha256: String,
}

/// Everything `convert` needs, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub output: PathBuf,
    pub atomic: bool,
    pub layout: PageLayout,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            output: PathBuf::from(DEFAULT_OUTPUT),
            atomic: true,
            layout: PageLayout::default(),
        }
    }
}

fn write_err(e: impl std::fmt::Display) -> EmitError {
    EmitError::WriteFailed(e.to_string())
}

/// Serialize records one compact JSON object per line into `out`.
/// Returns the number of records and the SHA-256 of the bytes written.
pub fn emit_records<W, I>(out: &mut W, records: I) -> Result<(usize, String), ConvertError>
where
    W: Write,
    I: IntoIterator<Item = Result<MaterialRecord, ConvertError>>,
{
    let mut hasher = Sha256::new();
    let mut count = 0usize;
    for record in records {
        let mut line = serde_json::to_vec(&record?).map_err(write_err)?;
        line.push(b'\n');
        out.write_all(&line).map_err(write_err)?;
        hasher.update(&line);
        count += 1;
    }
    out.flush().map_err(write_err)?;
    Ok((count, hex(&hasher.finalize())))
}

/// Convert every page pair under `settings.input_dir` into `settings.output`.
///
/// With `atomic` set, lines go to a temp file next to the target that is
/// renamed over it only once every pair parsed; otherwise the target is
/// written in place and a failure leaves whatever was flushed so far.
pub fn convert(settings: &Settings) -> Result<ConvertSummary, ConvertError> {
    let files = enumerate_inputs(&settings.input_dir)?;
    if files.len() % 2 != 0 {
        return Err(NamingError::OddFileCount { count: files.len() }.into());
    }
    tracing::info!(tool = "enumerate_inputs", dir = %settings.input_dir.display(), count = files.len());
    if files.is_empty() {
        tracing::warn!(tool = "enumerate_inputs", dir = %settings.input_dir.display(), "no pages found, output will be empty");
    }

    let layout = &settings.layout;
    let records = files.chunks(2).map(|pair| -> Result<MaterialRecord, ConvertError> {
        let record = merge_pages(parse_first_page(&pair[0], layout)?, parse_second_page(&pair[1], layout)?);
        tracing::debug!(tool = "parse_pair", first = %pair[0].path.display(), name = %record.page.name);
        Ok(record)
    });

    let output = &settings.output;
    let parent = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));

    let (count, sha256) = if settings.atomic {
        // every pair must parse before anything touches the output location
        let records: Vec<MaterialRecord> = records.collect::<Result<_, _>>()?;
        std::fs::create_dir_all(parent).map_err(write_err)?;
        let tmp = temp_output(parent, output).map_err(write_err)?;
        let mut writer = BufWriter::new(tmp);
        let emitted = emit_records(&mut writer, records.into_iter().map(Ok))?;
        let tmp = writer.into_inner().map_err(|e| write_err(e.error()))?;
        tmp.persist(output).map_err(|e| write_err(e.error))?;
        emitted
    } else {
        std::fs::create_dir_all(parent).map_err(write_err)?;
        let mut writer = BufWriter::new(File::create(output).map_err(write_err)?);
        emit_records(&mut writer, records)?
    };

    tracing::info!(tool = "emit_records", output = %output.display(), records = count, sha256 = %sha256);
    Ok(ConvertSummary { records: count, output: output.to_string_lossy().to_string(), sha256 })
}

/// Temp file next to `target` that ends up with the mode `File::create`
/// would give it: the umask default, or the target's mode when it exists.
fn temp_output(parent: &Path, target: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    #[allow(unused_mut)]
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // umask applies on open, as with File::create
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let tmp = builder.tempfile_in(parent)?;
    if let Ok(meta) = std::fs::metadata(target) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    Ok(tmp)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
