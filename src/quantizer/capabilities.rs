//! Installed-package detection.
//!
//! The versions of the external packages the quantizers depend on are probed
//! once and cached in a [`Capabilities`] value, which is then handed to each
//! quantizer instead of being queried on demand.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use std::sync::OnceLock;

/// Import name of the AutoRound package
pub const AUTO_ROUND_PACKAGE: &str = "auto_round";

/// Import name of the optimum package
pub const OPTIMUM_PACKAGE: &str = "optimum";

/// Packages probed by [`Capabilities::global`]
pub const PROBED_PACKAGES: [&str; 2] = [AUTO_ROUND_PACKAGE, OPTIMUM_PACKAGE];

/// Environment variable overriding the interpreter used for probing
pub const PYTHON_ENV: &str = "AUTOROUND_PYTHON";

/// Pre-release phase, in release order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreRelease::Alpha => "a",
            PreRelease::Beta => "b",
            PreRelease::Rc => "rc",
        })
    }
}

const PRE_LABELS: [(&str, PreRelease); 8] = [
    ("alpha", PreRelease::Alpha),
    ("a", PreRelease::Alpha),
    ("beta", PreRelease::Beta),
    ("b", PreRelease::Beta),
    ("rc", PreRelease::Rc),
    ("preview", PreRelease::Rc),
    ("pre", PreRelease::Rc),
    ("c", PreRelease::Rc),
];

const POST_LABELS: [(&str, ()); 3] = [("post", ()), ("rev", ()), ("r", ())];

const DEV_LABELS: [(&str, ()); 1] = [("dev", ())];

/// A package release version such as `0.5.1`, `0.5.0rc1` or `0.5.0.post1`.
///
/// Follows Python packaging order: release components compare numerically
/// with missing trailing components read as zero, then
/// `dev < a < b < rc < release < post`. A local suffix (`+cpu`) is ignored.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Release components after the third, as in `0.5.0.1`
    pub extra: Vec<u64>,
    pub pre: Option<(PreRelease, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
}

/// Where the pre-release part places a version among its siblings
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PhaseKey {
    DevOnly,
    Pre(PreRelease, u64),
    Final,
}

impl PackageVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            extra: Vec::new(),
            pre: None,
            post: None,
            dev: None,
        }
    }

    /// Parse a version string; returns `None` when it is not a valid release version
    pub fn parse(s: &str) -> Option<Self> {
        let lowered = s.trim().to_lowercase();
        let s = lowered.strip_prefix('v').unwrap_or(&lowered);
        let s = s.split('+').next().unwrap_or(s);

        let (first, mut rest) = leading_number(s)?;
        let mut release = vec![first];
        while let Some((n, next)) = rest.strip_prefix('.').and_then(leading_number) {
            release.push(n);
            rest = next;
        }

        let mut pre = None;
        if let Some((phase, next)) = strip_label(rest, &PRE_LABELS) {
            let (n, next) = label_number(next);
            pre = Some((phase, n));
            rest = next;
        }

        let mut post = None;
        if let Some(((), next)) = strip_label(rest, &POST_LABELS) {
            let (n, next) = label_number(next);
            post = Some(n);
            rest = next;
        } else if let Some((n, next)) = rest.strip_prefix('-').and_then(leading_number) {
            post = Some(n);
            rest = next;
        }

        let mut dev = None;
        if let Some(((), next)) = strip_label(rest, &DEV_LABELS) {
            let (n, next) = label_number(next);
            dev = Some(n);
            rest = next;
        }

        if !rest.is_empty() {
            return None;
        }

        release.resize(release.len().max(3), 0);
        Some(Self {
            major: release[0],
            minor: release[1],
            patch: release[2],
            extra: release.split_off(3),
            pre,
            post,
            dev,
        })
    }

    fn release(&self) -> impl Iterator<Item = u64> + '_ {
        [self.major, self.minor, self.patch]
            .into_iter()
            .chain(self.extra.iter().copied())
    }

    fn phase_key(&self) -> PhaseKey {
        match (self.pre, self.post, self.dev) {
            (Some((phase, n)), _, _) => PhaseKey::Pre(phase, n),
            (None, None, Some(_)) => PhaseKey::DevOnly,
            _ => PhaseKey::Final,
        }
    }
}

fn leading_number(s: &str) -> Option<(u64, &str)> {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    Some((s[..digits].parse().ok()?, &s[digits..]))
}

fn strip_label<'a, T: Copy>(s: &'a str, labels: &[(&str, T)]) -> Option<(T, &'a str)> {
    let s = s.strip_prefix(['.', '-', '_']).unwrap_or(s);
    labels
        .iter()
        .find_map(|&(label, value)| s.strip_prefix(label).map(|rest| (value, rest)))
}

// A label without a number counts as 0 (`1.0.post` is `1.0.post0`)
fn label_number(s: &str) -> (u64, &str) {
    let trimmed = s.strip_prefix(['.', '-', '_']).unwrap_or(s);
    leading_number(trimmed).unwrap_or((0, s))
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b): (Vec<u64>, Vec<u64>) = (self.release().collect(), other.release().collect());
        let len = a.len().max(b.len());
        let release = (0..len)
            .map(|i| a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal);

        release
            .then_with(|| self.phase_key().cmp(&other.phase_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| (self.dev.is_none(), self.dev).cmp(&(other.dev.is_none(), other.dev)))
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        for n in &self.extra {
            write!(f, ".{}", n)?;
        }
        if let Some((phase, n)) = self.pre {
            write!(f, "{}{}", phase, n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{}", n)?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{}", n)?;
        }
        Ok(())
    }
}

/// Source of installed package versions
pub trait PackageProbe {
    /// Installed version of `package`, or `None` when it is not installed
    fn version(&self, package: &str) -> Option<PackageVersion>;
}

/// Probes packages through a Python interpreter's `importlib.metadata`.
#[derive(Debug, Clone)]
pub struct PythonPackageProbe {
    interpreter: String,
}

impl PythonPackageProbe {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Use `$AUTOROUND_PYTHON`, falling back to `python3`
    pub fn from_env() -> Self {
        Self::new(std::env::var(PYTHON_ENV).unwrap_or_else(|_| "python3".to_string()))
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

impl Default for PythonPackageProbe {
    fn default() -> Self {
        Self::from_env()
    }
}

const VERSION_SCRIPT: &str = "import sys, importlib.metadata as m\n\
try:\n    print(m.version(sys.argv[1]))\n\
except m.PackageNotFoundError:\n    sys.exit(1)\n";

impl PackageProbe for PythonPackageProbe {
    fn version(&self, package: &str) -> Option<PackageVersion> {
        let output = match Command::new(&self.interpreter)
            .args(["-c", VERSION_SCRIPT, package])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Could not run {}: {}", self.interpreter, e);
                return None;
            }
        };

        if !output.status.success() {
            tracing::debug!("{} is not installed for {}", package, self.interpreter);
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = PackageVersion::parse(&stdout);
        if version.is_none() {
            tracing::warn!("Unparseable version for {}: {:?}", package, stdout.trim());
        }
        version
    }
}

/// Installed versions of the packages the quantizers depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    versions: BTreeMap<String, Option<PackageVersion>>,
}

impl Capabilities {
    /// Probe each package once
    pub fn detect(probe: &dyn PackageProbe, packages: &[&str]) -> Self {
        let versions = packages
            .iter()
            .map(|&package| {
                let version = probe.version(package);
                tracing::debug!("Probed {}: {:?}", package, version);
                (package.to_string(), version)
            })
            .collect();

        Self { versions }
    }

    /// Build from known versions; packages not listed count as absent
    pub fn from_versions<'a>(versions: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            versions: versions
                .into_iter()
                .map(|(package, version)| (package.to_string(), PackageVersion::parse(version)))
                .collect(),
        }
    }

    /// Process-wide capabilities, probed on first use with [`PythonPackageProbe::from_env`]
    pub fn global() -> &'static Capabilities {
        static GLOBAL: OnceLock<Capabilities> = OnceLock::new();
        GLOBAL.get_or_init(|| Capabilities::detect(&PythonPackageProbe::from_env(), &PROBED_PACKAGES))
    }

    pub fn version(&self, package: &str) -> Option<&PackageVersion> {
        self.versions.get(package).and_then(Option::as_ref)
    }

    pub fn is_available(&self, package: &str) -> bool {
        self.version(package).is_some()
    }

    /// All probed packages with their versions
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&PackageVersion>)> {
        self.versions
            .iter()
            .map(|(package, version)| (package.as_str(), version.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe;

    impl PackageProbe for FixedProbe {
        fn version(&self, package: &str) -> Option<PackageVersion> {
            match package {
                "auto_round" => PackageVersion::parse("0.5.1"),
                _ => None,
            }
        }
    }

    #[test]
    fn test_parse_versions() {
        assert_eq!(PackageVersion::parse("0.5.1"), Some(PackageVersion::new(0, 5, 1)));
        assert_eq!(PackageVersion::parse("1.2"), Some(PackageVersion::new(1, 2, 0)));
        assert_eq!(PackageVersion::parse("v2"), Some(PackageVersion::new(2, 0, 0)));
        assert_eq!(PackageVersion::parse("0.4.7+cpu"), Some(PackageVersion::new(0, 4, 7)));
        assert_eq!(PackageVersion::parse("0.5.0.dev3").unwrap().dev, Some(3));
        assert_eq!(
            PackageVersion::parse("0.5.0rc1").unwrap().pre,
            Some((PreRelease::Rc, 1))
        );
        assert_eq!(PackageVersion::parse("0.5.0.post1").unwrap().post, Some(1));
        assert_eq!(PackageVersion::parse("0.5.0-2").unwrap().post, Some(2));
        assert_eq!(PackageVersion::parse("0.5.0.1").unwrap().extra, vec![1]);
        assert_eq!(PackageVersion::parse("unknown"), None);
        assert_eq!(PackageVersion::parse("0.5.0-final"), None);
        assert_eq!(PackageVersion::parse(""), None);
    }

    #[test]
    fn test_version_ordering() {
        let floor = PackageVersion::new(0, 5, 0);
        let v = |s: &str| PackageVersion::parse(s).unwrap();

        assert!(v("0.4.9") < floor);
        assert!(v("0.4.9.post3") < floor);
        assert!(v("0.5.0rc1") < floor);
        assert!(v("0.5.0.dev3") < floor);
        assert!(v("0.5.0.dev3") < v("0.5.0a1"));
        assert!(v("0.5.0a1") < v("0.5.0b1"));
        assert!(v("0.5.0b1") < v("0.5.0rc1"));
        assert!(v("0.5.0") >= floor);
        assert_eq!(v("0.5.0.0"), floor);
        assert!(v("0.5.0.post1") > floor);
        assert!(v("0.5.0-post1") > floor);
        assert!(v("0.5.0-1") > floor);
        assert!(v("0.5.0.1") > floor);
        assert!(v("0.5.0.post1") < v("0.5.1"));
        assert!(v("0.10.0") > floor);
        assert!(v("1.0") > floor);
    }

    #[test]
    fn test_display() {
        assert_eq!(PackageVersion::new(0, 4, 7).to_string(), "0.4.7");
        assert_eq!(PackageVersion::parse("0.5.0.1rc2").unwrap().to_string(), "0.5.0.1rc2");
        assert_eq!(PackageVersion::parse("0.5.0-post1").unwrap().to_string(), "0.5.0.post1");
        assert_eq!(PackageVersion::parse("1.0.dev").unwrap().to_string(), "1.0.0.dev0");
    }

    #[test]
    fn test_detect_with_probe() {
        let caps = Capabilities::detect(&FixedProbe, &PROBED_PACKAGES);
        assert!(caps.is_available(AUTO_ROUND_PACKAGE));
        assert!(!caps.is_available(OPTIMUM_PACKAGE));
        assert_eq!(caps.iter().count(), 2);
    }

    #[test]
    fn test_from_versions() {
        let caps = Capabilities::from_versions([("auto_round", "0.5.0"), ("optimum", "1.23.3")]);
        assert_eq!(caps.version("optimum"), Some(&PackageVersion::new(1, 23, 3)));
        assert!(!caps.is_available("intel_extension_for_pytorch"));
    }

    #[test]
    fn test_missing_interpreter_reports_absent() {
        let probe = PythonPackageProbe::new("definitely-not-a-python-interpreter");
        assert_eq!(probe.version(AUTO_ROUND_PACKAGE), None);
    }
}
