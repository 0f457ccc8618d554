//! Lockfile parsing adapter.
//!
//! The actual parsing of lockfile formats is delegated to a [`LockfileParser`]
//! capability: the remote parsing service, the installed CLI, or a native
//! binding supplied by the caller. [`LockfileAdapter`] owns everything around
//! that call:
//! - rejecting missing or empty files before the parser is invoked
//! - detecting the lockfile format from the file name
//! - normalizing the tool name the parser reports to a registry ([`PackageType`])

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::client::PhylumClient;
use crate::error::{PhylumError, Result};
use crate::model::{PackageDescriptor, PackageType};

// ============================================================================
// Formats and ecosystems
// ============================================================================

/// Lockfile formats, named after the tool that writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockfileFormat {
    Npm,
    Yarn,
    Gem,
    Pip,
    Pipenv,
    Poetry,
    Mvn,
    Gradle,
    Nuget,
}

/// Well-known lockfile names and the format they imply.
const KNOWN_FILENAMES: &[(&str, LockfileFormat)] = &[
    ("package-lock.json", LockfileFormat::Npm),
    ("npm-shrinkwrap.json", LockfileFormat::Npm),
    ("yarn.lock", LockfileFormat::Yarn),
    ("Gemfile.lock", LockfileFormat::Gem),
    ("requirements.txt", LockfileFormat::Pip),
    ("Pipfile.lock", LockfileFormat::Pipenv),
    ("poetry.lock", LockfileFormat::Poetry),
    ("pom.xml", LockfileFormat::Mvn),
    ("effective-pom.xml", LockfileFormat::Mvn),
    ("gradle.lockfile", LockfileFormat::Gradle),
    ("packages.lock.json", LockfileFormat::Nuget),
];

impl LockfileFormat {
    pub fn name(&self) -> &'static str {
        match self {
            LockfileFormat::Npm => "npm",
            LockfileFormat::Yarn => "yarn",
            LockfileFormat::Gem => "gem",
            LockfileFormat::Pip => "pip",
            LockfileFormat::Pipenv => "pipenv",
            LockfileFormat::Poetry => "poetry",
            LockfileFormat::Mvn => "mvn",
            LockfileFormat::Gradle => "gradle",
            LockfileFormat::Nuget => "nuget",
        }
    }

    /// Guesses the format from the file name alone.
    pub fn for_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;

        if let Some((_, format)) = KNOWN_FILENAMES
            .iter()
            .find(|(known, _)| *known == file_name)
        {
            return Some(*format);
        }

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("csproj") => Some(LockfileFormat::Nuget),
            _ => None,
        }
    }

    pub fn package_type(&self) -> PackageType {
        match self {
            LockfileFormat::Npm | LockfileFormat::Yarn => PackageType::Npm,
            LockfileFormat::Gem => PackageType::Rubygems,
            LockfileFormat::Pip | LockfileFormat::Pipenv | LockfileFormat::Poetry => {
                PackageType::Pypi
            }
            LockfileFormat::Mvn | LockfileFormat::Gradle => PackageType::Maven,
            LockfileFormat::Nuget => PackageType::Nuget,
        }
    }
}

impl fmt::Display for LockfileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps a tool or registry name to its canonical registry.
///
/// Canonical names map to themselves, so parsers that already report a
/// registry (`pypi`, `rubygems`, ...) pass through unchanged.
///
/// # Errors
///
/// [`PhylumError::UnsupportedEcosystem`] for any other name.
pub fn normalize_ecosystem(name: &str) -> Result<PackageType> {
    let package_type = match name.trim().to_ascii_lowercase().as_str() {
        "poetry" | "pip" | "pipenv" | "pypi" => PackageType::Pypi,
        "npm" | "yarn" => PackageType::Npm,
        "gem" | "rubygems" => PackageType::Rubygems,
        "gradle" | "mvn" | "maven" => PackageType::Maven,
        "nuget" => PackageType::Nuget,
        _ => return Err(PhylumError::UnsupportedEcosystem(name.to_string())),
    };
    Ok(package_type)
}

// ============================================================================
// Parser capability
// ============================================================================

/// Input handed to a [`LockfileParser`].
#[derive(Debug, Clone)]
pub struct LockfileSource {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub format: Option<LockfileFormat>,
}

impl LockfileSource {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lockfile".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileDependency {
    pub name: String,
    pub version: String,
}

/// What a parser extracted: dependencies plus the tool/ecosystem it detected.
#[derive(Debug, Clone)]
pub struct ParsedLockfile {
    pub ecosystem: String,
    pub dependencies: Vec<LockfileDependency>,
}

#[async_trait]
pub trait LockfileParser: Send + Sync {
    /// Short name used in logs (e.g. "remote", "cli").
    fn parser_id(&self) -> &str;

    /// Parses one lockfile.
    ///
    /// # Errors
    ///
    /// [`PhylumError::ParseFailure`] when the content is not a lockfile the
    /// parser understands.
    async fn parse(&self, source: &LockfileSource) -> Result<ParsedLockfile>;
}

/// Validates, delegates and normalizes.
pub struct LockfileAdapter<P: ?Sized> {
    parser: Arc<P>,
}

impl<P> LockfileAdapter<P>
where
    P: LockfileParser + ?Sized,
{
    pub fn new(parser: Arc<P>) -> Self {
        Self { parser }
    }

    /// Parses the lockfile at `path` into submittable package descriptors.
    ///
    /// # Errors
    ///
    /// - [`PhylumError::NotFound`] if `path` does not exist
    /// - [`PhylumError::ParseFailure`] if it is empty, not a file, or the
    ///   parser rejects it
    /// - [`PhylumError::UnsupportedEcosystem`] if the parser reports a tool
    ///   with no registry mapping
    #[instrument(skip(self), fields(parser = %self.parser.parser_id()))]
    pub async fn parse_lockfile(&self, path: &Path) -> Result<Vec<PackageDescriptor>> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PhylumError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(PhylumError::Io(e)),
        };
        if !metadata.is_file() {
            return Err(PhylumError::ParseFailure(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(PhylumError::ParseFailure(format!(
                "{} is empty",
                path.display()
            )));
        }

        let source = LockfileSource {
            path: path.to_path_buf(),
            content: tokio::fs::read(path).await?,
            format: LockfileFormat::for_path(path),
        };
        debug!(
            format = ?source.format,
            bytes = source.content.len(),
            "Delegating lockfile parse"
        );

        let parsed = self.parser.parse(&source).await?;
        let package_type = normalize_ecosystem(&parsed.ecosystem)?;

        info!(
            ecosystem = %package_type,
            dependencies = parsed.dependencies.len(),
            "Lockfile parsed"
        );

        Ok(parsed
            .dependencies
            .into_iter()
            .map(|dep| PackageDescriptor {
                name: dep.name,
                version: dep.version,
                package_type,
            })
            .collect())
    }
}

/// Ecosystem for a parser that only returned descriptors.
fn ecosystem_of(descriptors: &[PackageDescriptor], source: &LockfileSource) -> Result<String> {
    descriptors
        .first()
        .map(|d| d.package_type.as_str().to_string())
        .or_else(|| source.format.map(|f| f.name().to_string()))
        .ok_or_else(|| {
            PhylumError::ParseFailure(format!(
                "could not determine the ecosystem of {}",
                source.path.display()
            ))
        })
}

fn into_parsed(
    descriptors: Vec<PackageDescriptor>,
    source: &LockfileSource,
) -> Result<ParsedLockfile> {
    Ok(ParsedLockfile {
        ecosystem: ecosystem_of(&descriptors, source)?,
        dependencies: descriptors
            .into_iter()
            .map(|d| LockfileDependency {
                name: d.name,
                version: d.version,
            })
            .collect(),
    })
}

// ============================================================================
// Remote parsing service
// ============================================================================

/// Uploads the lockfile to the parsing service configured on the client.
pub struct RemoteLockfileParser {
    client: PhylumClient,
}

impl RemoteLockfileParser {
    pub fn new(client: PhylumClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LockfileParser for RemoteLockfileParser {
    fn parser_id(&self) -> &str {
        "remote"
    }

    async fn parse(&self, source: &LockfileSource) -> Result<ParsedLockfile> {
        let descriptors = self
            .client
            .upload_lockfile(source.file_name(), source.content.clone())
            .await
            .map_err(|e| match e {
                PhylumError::Api { code, description } if (400..500).contains(&code) => {
                    PhylumError::ParseFailure(format!("{} ({})", description, code))
                }
                PhylumError::Decode(e) => PhylumError::ParseFailure(e.to_string()),
                other => other,
            })?;
        into_parsed(descriptors, source)
    }
}

// ============================================================================
// CLI subprocess
// ============================================================================

#[derive(Deserialize)]
struct CliDependency {
    name: String,
    version: String,
    #[serde(rename = "type")]
    package_type: PackageType,
}

/// Runs `<program> parse <path>` and reads the JSON dependency list it prints.
pub struct CommandLockfileParser {
    program: String,
}

impl CommandLockfileParser {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl LockfileParser for CommandLockfileParser {
    fn parser_id(&self) -> &str {
        "cli"
    }

    async fn parse(&self, source: &LockfileSource) -> Result<ParsedLockfile> {
        let output = Command::new(&self.program)
            .arg("parse")
            .arg(&source.path)
            .output()
            .await
            .map_err(|e| {
                PhylumError::ParseFailure(format!("failed to run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(PhylumError::ParseFailure(format!(
                "'{} parse' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let listed: Vec<CliDependency> = serde_json::from_slice(&output.stdout)
            .map_err(|e| PhylumError::ParseFailure(format!("unreadable parser output: {}", e)))?;
        let descriptors = listed
            .into_iter()
            .map(|dep| PackageDescriptor {
                name: dep.name,
                version: dep.version,
                package_type: dep.package_type,
            })
            .collect();
        into_parsed(descriptors, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Parser returning a canned result and remembering what it was given.
    struct StubParser {
        result: fn() -> Result<ParsedLockfile>,
        seen: Mutex<Vec<LockfileSource>>,
    }

    impl StubParser {
        fn new(result: fn() -> Result<ParsedLockfile>) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LockfileParser for StubParser {
        fn parser_id(&self) -> &str {
            "stub"
        }

        async fn parse(&self, source: &LockfileSource) -> Result<ParsedLockfile> {
            self.seen.lock().unwrap().push(source.clone());
            (self.result)()
        }
    }

    fn poetry_result() -> Result<ParsedLockfile> {
        Ok(ParsedLockfile {
            ecosystem: "poetry".to_string(),
            dependencies: vec![
                LockfileDependency {
                    name: "requests".to_string(),
                    version: "2.31.0".to_string(),
                },
                LockfileDependency {
                    name: "urllib3".to_string(),
                    version: "2.0.4".to_string(),
                },
            ],
        })
    }

    fn write_fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_normalize_table() {
        assert_eq!(normalize_ecosystem("poetry").unwrap(), PackageType::Pypi);
        assert_eq!(normalize_ecosystem("pip").unwrap(), PackageType::Pypi);
        assert_eq!(normalize_ecosystem("pipenv").unwrap(), PackageType::Pypi);
        assert_eq!(normalize_ecosystem("npm").unwrap(), PackageType::Npm);
        assert_eq!(normalize_ecosystem("yarn").unwrap(), PackageType::Npm);
        assert_eq!(normalize_ecosystem("gem").unwrap(), PackageType::Rubygems);
        assert_eq!(normalize_ecosystem("gradle").unwrap(), PackageType::Maven);
        assert_eq!(normalize_ecosystem("mvn").unwrap(), PackageType::Maven);
        assert_eq!(normalize_ecosystem("nuget").unwrap(), PackageType::Nuget);
    }

    #[test]
    fn test_normalize_rejects_unknown_tool() {
        match normalize_ecosystem("unknown-tool") {
            Err(PhylumError::UnsupportedEcosystem(name)) => assert_eq!(name, "unknown-tool"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_every_format_normalizes_to_its_package_type() {
        for (_, format) in KNOWN_FILENAMES {
            assert_eq!(normalize_ecosystem(format.name()).unwrap(), format.package_type());
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            LockfileFormat::for_path(Path::new("/src/app/package-lock.json")),
            Some(LockfileFormat::Npm)
        );
        assert_eq!(
            LockfileFormat::for_path(Path::new("Gemfile.lock")),
            Some(LockfileFormat::Gem)
        );
        assert_eq!(
            LockfileFormat::for_path(Path::new("src/App.csproj")),
            Some(LockfileFormat::Nuget)
        );
        assert_eq!(LockfileFormat::for_path(Path::new("README.md")), None);
    }

    #[tokio::test]
    async fn test_adapter_normalizes_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "poetry.lock", "[[package]]\nname = \"requests\"\n");
        let parser = StubParser::new(poetry_result);
        let adapter = LockfileAdapter::new(parser.clone());

        let packages = adapter.parse_lockfile(&path).await.unwrap();

        assert_eq!(packages.len(), 2);
        assert!(packages.iter().all(|p| p.package_type == PackageType::Pypi));
        assert_eq!(packages[0].name, "requests");

        let seen = parser.seen.lock().unwrap();
        assert_eq!(seen[0].format, Some(LockfileFormat::Poetry));
        assert!(!seen[0].content.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let parser = StubParser::new(poetry_result);
        let adapter = LockfileAdapter::new(parser.clone());

        let result = adapter
            .parse_lockfile(Path::new("/definitely/not/here/yarn.lock"))
            .await;

        assert!(matches!(result, Err(PhylumError::NotFound(_))));
        assert!(parser.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "yarn.lock", "");
        let parser = StubParser::new(poetry_result);
        let adapter = LockfileAdapter::new(parser.clone());

        let result = adapter.parse_lockfile(&path).await;

        assert!(matches!(result, Err(PhylumError::ParseFailure(_))));
        assert!(parser.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LockfileAdapter::new(StubParser::new(poetry_result));

        let result = adapter.parse_lockfile(dir.path()).await;
        assert!(matches!(result, Err(PhylumError::ParseFailure(_))));
    }

    #[tokio::test]
    async fn test_parser_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "package-lock.json", "{ not json");
        let adapter = LockfileAdapter::new(StubParser::new(|| {
            Err(PhylumError::ParseFailure("unexpected token".to_string()))
        }));

        let result = adapter.parse_lockfile(&path).await;
        assert!(matches!(result, Err(PhylumError::ParseFailure(_))));
    }

    #[tokio::test]
    async fn test_unknown_ecosystem_from_parser_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "go.sum", "example.com/x v1.0.0 h1:abc\n");
        let adapter = LockfileAdapter::new(StubParser::new(|| {
            Ok(ParsedLockfile {
                ecosystem: "gomod".to_string(),
                dependencies: Vec::new(),
            })
        }));

        let result = adapter.parse_lockfile(&path).await;
        assert!(matches!(result, Err(PhylumError::UnsupportedEcosystem(_))));
    }

    #[tokio::test]
    async fn test_adapter_accepts_trait_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "Pipfile.lock", "{}");
        let parser: Arc<dyn LockfileParser> = StubParser::new(poetry_result);
        let adapter = LockfileAdapter::new(parser);

        assert_eq!(adapter.parse_lockfile(&path).await.unwrap().len(), 2);
    }

    #[test]
    fn test_ecosystem_falls_back_to_format() {
        let source = LockfileSource {
            path: PathBuf::from("yarn.lock"),
            content: b"# yarn lockfile v1\n".to_vec(),
            format: Some(LockfileFormat::Yarn),
        };
        let parsed = into_parsed(Vec::new(), &source).unwrap();
        assert_eq!(parsed.ecosystem, "yarn");
        assert!(parsed.dependencies.is_empty());

        let unknown = LockfileSource {
            format: None,
            ..source
        };
        assert!(matches!(
            into_parsed(Vec::new(), &unknown),
            Err(PhylumError::ParseFailure(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_parser_reports_failing_process() {
        let source = LockfileSource {
            path: PathBuf::from("package-lock.json"),
            content: b"{}".to_vec(),
            format: Some(LockfileFormat::Npm),
        };
        let parser = CommandLockfileParser::new("false");

        assert!(matches!(
            parser.parse(&source).await,
            Err(PhylumError::ParseFailure(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_parser_reads_json_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_fixture(
            &dir,
            "fake-phylum",
            "#!/bin/sh\necho '[{\"name\": \"left-pad\", \"version\": \"1.3.0\", \"type\": \"npm\"}]'\n",
        );
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let source = LockfileSource {
            path: PathBuf::from("package-lock.json"),
            content: b"{}".to_vec(),
            format: Some(LockfileFormat::Npm),
        };
        let parser = CommandLockfileParser::new(script.display().to_string());

        let parsed = parser.parse(&source).await.unwrap();
        assert_eq!(parsed.ecosystem, "npm");
        assert_eq!(
            parsed.dependencies,
            vec![LockfileDependency {
                name: "left-pad".to_string(),
                version: "1.3.0".to_string(),
            }]
        );
    }
}
