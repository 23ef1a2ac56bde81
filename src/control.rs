//! Debian control stanza parsing.
//!
//! Turns the textual output of `apt-cache show` into [`PackageRecord`] values.
//! Every field is extracted by its own pattern anchored to the field label, so
//! the order of lines inside a stanza does not matter. The four required fields
//! (`Package`, `Version`, `Maintainer` and `Description`) are extracted first; if
//! any of them is missing or malformed the stanza is skipped with a
//! [`SkipReason`] and no optional field is looked at.
//!
//! # Examples
//!
//! ```rust
//! use apt_batch::control::parse_stanza;
//!
//! let stanza = "Package: htop\n\
//!               Version: 2.2.0-1\n\
//!               Maintainer: Jane Doe <jane@example.com>\n\
//!               Description-en: Process viewer\n .";
//! let record = parse_stanza(stanza).unwrap();
//! assert_eq!(record.name, "htop");
//! assert_eq!(record.version.revision.as_deref(), Some("1"));
//! assert_eq!(record.description, "Process viewer\n");
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace, warn};

static PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^Package: ([a-z0-9][a-z0-9.+-]*)[ \t]*$"));
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    field_regex(r"^Version: (?:([0-9]+):)?([A-Za-z0-9][A-Za-z0-9.+~-]*?)(?:-([A-Za-z0-9.+~]+))?[ \t]*$")
});
static MAINTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    field_regex(r"^Maintainer: ([^<\n]*[^<\s]) <([^<>@\s]+@[^<>@\s]+\.[^<>@\s]+)>")
});
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    field_regex(r"^Description(?:-[a-z]{2}(?:_[A-Z]{2})?)?: (.*(?:\n .*)*)")
});

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| field_regex(r"^Section: ([a-z0-9/+-]+)"));
static PRIORITY_RE: LazyLock<Regex> = LazyLock::new(|| field_regex(r"^Priority: (\S+)"));
static ESSENTIAL_RE: LazyLock<Regex> = LazyLock::new(|| field_regex(r"^Essential: (yes|no)"));
static ARCHITECTURE_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^Architecture: (\S.*?)[ \t]*$"));
static ORIGIN_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^Origin: ([A-Za-z0-9][A-Za-z0-9.+-]*)"));
static BUGS_RE: LazyLock<Regex> = LazyLock::new(|| field_regex(r"^Bugs: ([a-z]+://\S+)"));
static HOMEPAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^Homepage: ([a-z]+://\S+)"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| field_regex(r"^Tag: (.*(?:\n .*)*)"));
static SOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^Source: ([a-z0-9][a-z0-9.+-]*(?: \([^)\n]+\))?)"));
static INSTALLED_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^Installed-Size: ([0-9]+)[ \t]*$"));
static DOWNLOAD_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^Download-Size: (\S.*?)[ \t]*$"));
static MANUAL_INSTALLED_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^APT-Manual-Installed: (yes|no)"));
static APT_SOURCES_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"^APT-Sources: (https?://\S+(?: \S+)*)"));

/// One alternative of a relation: `name[:arch] [(op version)] [[arch list]]`.
const RELATION_ATOM: &str =
    r"[a-z0-9][a-z0-9.+-]*(?::[a-z0-9-]+)?(?: \((?:<<|>>|<=|>=|=|<|>) ?[A-Za-z0-9.+~:-]+\))?(?: \[[^\]\n]+\])?";

static DEPENDS_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Depends"));
static PRE_DEPENDS_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Pre-Depends"));
static RECOMMENDS_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Recommends"));
static SUGGESTS_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Suggests"));
static BREAKS_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Breaks"));
static CONFLICTS_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Conflicts"));
static REPLACES_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Replaces"));
static PROVIDES_RE: LazyLock<Regex> = LazyLock::new(|| relation_regex("Provides"));

fn field_regex(pattern: &str) -> Regex {
    // Patterns are compile-time constants and covered by the tests below.
    Regex::new(&format!("(?m){pattern}")).expect("invalid control field pattern")
}

fn relation_regex(label: &str) -> Regex {
    let alternation = format!("{RELATION_ATOM}(?: \\| {RELATION_ATOM})*");
    field_regex(&format!(
        r"^{label}: ({alternation}(?:, {alternation})*)[ \t]*$"
    ))
}

static PACKAGE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| field_regex(r"\A[a-z0-9][a-z0-9.+-]*(?::[a-z0-9-]+)?\z"));

/// Whether `name` is a Debian package name, optionally qualified with `:arch`.
#[must_use]
pub fn is_valid_package_name(name: &str) -> bool {
    PACKAGE_NAME_RE.is_match(name)
}

/// Whether `version` is a single well-formed Debian version string.
#[must_use]
pub fn is_valid_version(version: &str) -> bool {
    !version.contains(char::is_whitespace)
        && Version::parse(version).is_some_and(|parsed| parsed.as_str() == version)
}

/// The required fields of a control stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequiredField {
    Package,
    Version,
    Maintainer,
    Description,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequiredField::Package => "Package",
            RequiredField::Version => "Version",
            RequiredField::Maintainer => "Maintainer",
            RequiredField::Description => "Description",
        };
        f.write_str(label)
    }
}

/// Why a stanza was dropped instead of producing a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReason {
    /// The first required field that failed to match.
    pub field: RequiredField,
    /// The package name, when the `Package` field itself was readable.
    pub package: Option<String>,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing or malformed required field `{}`", self.field)?;
        if let Some(package) = &self.package {
            write!(f, " in stanza for {package}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SkipReason {}

/// A Debian package version split into its comparison components.
///
/// Only the decomposition is kept here; ordering between versions is left to
/// callers that need it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Version {
    pub epoch: Option<u32>,
    pub upstream: String,
    pub revision: Option<String>,
    raw: String,
}

impl Version {
    /// Parses a bare version string such as `1:2.30-4ubuntu1`.
    #[must_use]
    pub fn parse(version: &str) -> Option<Self> {
        let line = format!("Version: {}", version.trim());
        Self::from_stanza(&line)
    }

    fn from_stanza(stanza: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(stanza)?;
        let epoch = match caps.get(1) {
            Some(m) => Some(m.as_str().parse::<u32>().ok()?),
            None => None,
        };
        let upstream = caps.get(2)?.as_str().to_string();
        let revision = caps.get(3).map(|m| m.as_str().to_string());
        let raw = caps.get(0)?.as_str()["Version: ".len()..].trim_end().to_string();
        Some(Version {
            epoch,
            upstream,
            revision,
            raw,
        })
    }

    /// The version exactly as it appeared in the stanza.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Components in comparison precedence: epoch, then upstream, then revision.
    ///
    /// A missing epoch counts as `0` and a missing revision as the empty string,
    /// matching how dpkg treats them.
    #[must_use]
    pub fn sort_key(&self) -> (u32, &str, &str) {
        (
            self.epoch.unwrap_or(0),
            &self.upstream,
            self.revision.as_deref().unwrap_or(""),
        )
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A package maintainer as `Display Name <email>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Maintainer {
    pub name: String,
    pub email: String,
}

impl fmt::Display for Maintainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// A package description extracted from a control stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    // Required fields
    pub name: String,
    pub version: Version,
    pub maintainer: Maintainer,
    /// Summary line followed by the dedented long description.
    pub description: String,

    // Optional fields
    pub section: Option<String>,
    pub priority: Option<String>,
    pub essential: Option<bool>,
    pub architecture: Option<String>,
    pub origin: Option<String>,
    pub bugs: Option<String>,
    pub homepage: Option<String>,
    pub tags: Option<Vec<String>>,
    pub source: Option<String>,
    pub depends: Option<String>,
    pub pre_depends: Option<String>,
    pub recommends: Option<String>,
    pub suggests: Option<String>,
    pub breaks: Option<String>,
    pub conflicts: Option<String>,
    pub replaces: Option<String>,
    pub provides: Option<String>,
    /// Installed size in KiB.
    pub installed_size: Option<u64>,
    pub download_size: Option<String>,
    pub manual_installed: Option<bool>,
    pub apt_sources: Option<String>,
}

impl PackageRecord {
    /// The first line of the description.
    #[must_use]
    pub fn summary(&self) -> &str {
        self.description.lines().next().unwrap_or("")
    }
}

/// Records parsed from a multi-stanza dump, together with what was skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub records: Vec<PackageRecord>,
    pub skipped: Vec<SkipReason>,
}

fn capture<'a>(re: &Regex, stanza: &'a str) -> Option<&'a str> {
    re.captures(stanza)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn capture_owned(re: &Regex, stanza: &str) -> Option<String> {
    capture(re, stanza).map(str::to_string)
}

fn capture_flag(re: &Regex, stanza: &str) -> Option<bool> {
    capture(re, stanza).map(|v| v == "yes")
}

/// Parses a single control stanza.
///
/// # Errors
///
/// Returns a [`SkipReason`] naming the first required field that is missing or
/// malformed. No optional field is extracted in that case.
pub fn parse_stanza(stanza: &str) -> Result<PackageRecord, SkipReason> {
    let package = capture(&PACKAGE_RE, stanza);
    let skip = |field| SkipReason {
        field,
        package: package.map(str::to_string),
    };

    let name = package.ok_or_else(|| skip(RequiredField::Package))?;
    let version = Version::from_stanza(stanza).ok_or_else(|| skip(RequiredField::Version))?;
    let maintainer = MAINTAINER_RE
        .captures(stanza)
        .map(|caps| Maintainer {
            name: caps[1].trim().to_string(),
            email: caps[2].to_string(),
        })
        .ok_or_else(|| skip(RequiredField::Maintainer))?;
    let description = capture(&DESCRIPTION_RE, stanza)
        .map(format_description)
        .ok_or_else(|| skip(RequiredField::Description))?;

    trace!("Required fields of {} parsed", name);

    Ok(PackageRecord {
        name: name.to_string(),
        version,
        maintainer,
        description,
        section: capture_owned(&SECTION_RE, stanza),
        priority: capture_owned(&PRIORITY_RE, stanza),
        essential: capture_flag(&ESSENTIAL_RE, stanza),
        architecture: capture_owned(&ARCHITECTURE_RE, stanza),
        origin: capture_owned(&ORIGIN_RE, stanza),
        bugs: capture_owned(&BUGS_RE, stanza),
        homepage: capture_owned(&HOMEPAGE_RE, stanza),
        tags: capture(&TAG_RE, stanza).map(split_tags),
        source: capture_owned(&SOURCE_RE, stanza),
        depends: capture_owned(&DEPENDS_RE, stanza),
        pre_depends: capture_owned(&PRE_DEPENDS_RE, stanza),
        recommends: capture_owned(&RECOMMENDS_RE, stanza),
        suggests: capture_owned(&SUGGESTS_RE, stanza),
        breaks: capture_owned(&BREAKS_RE, stanza),
        conflicts: capture_owned(&CONFLICTS_RE, stanza),
        replaces: capture_owned(&REPLACES_RE, stanza),
        provides: capture_owned(&PROVIDES_RE, stanza),
        installed_size: capture(&INSTALLED_SIZE_RE, stanza).and_then(|v| v.parse().ok()),
        download_size: capture_owned(&DOWNLOAD_SIZE_RE, stanza),
        manual_installed: capture_flag(&MANUAL_INSTALLED_RE, stanza),
        apt_sources: capture_owned(&APT_SOURCES_RE, stanza),
    })
}

/// Parses every stanza of a blank-line separated dump.
///
/// Stanzas with a missing required field are logged and skipped; parsing always
/// continues with the next stanza.
#[must_use]
pub fn parse_stanzas(text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for stanza in split_stanzas(text) {
        match parse_stanza(&stanza) {
            Ok(record) => outcome.records.push(record),
            Err(reason) => {
                warn!("Skipping invalid package stanza: {}", reason);
                trace!("{}", stanza);
                outcome.skipped.push(reason);
            }
        }
    }
    debug!(
        "Parsed {} package records, skipped {}",
        outcome.records.len(),
        outcome.skipped.len()
    );
    outcome
}

fn split_stanzas(text: &str) -> Vec<String> {
    let mut stanzas = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        stanzas.push(current.join("\n"));
    }
    stanzas
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalizes a description field value.
///
/// - continuation lines indented by a single space are dedented
/// - a lone ` .` line becomes an empty line (paragraph break)
/// - lines indented by two or more spaces are kept verbatim
/// - the first character is upper-cased
/// - the summary line gets a trailing period when a long description follows it
///
/// Applying the function to its own output returns the output unchanged.
#[must_use]
pub fn format_description(raw: &str) -> String {
    let mut lines = raw.split('\n');
    let summary = lines.next().unwrap_or("").trim_end();

    let body: Vec<String> = lines
        .map(|line| {
            if line == " ." {
                String::new()
            } else if line.starts_with("  ") {
                line.to_string()
            } else if let Some(rest) = line.strip_prefix(' ') {
                rest.to_string()
            } else {
                line.to_string()
            }
        })
        .collect();

    let mut summary = capitalize(summary);
    let has_body_text = body.iter().any(|line| !line.trim().is_empty());
    if has_body_text && !summary.ends_with('.') {
        summary.push('.');
    }

    if body.is_empty() {
        summary
    } else {
        format!("{}\n{}", summary, body.join("\n"))
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
