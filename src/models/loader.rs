//! Model artifact resolution and loading

use crate::config::ArtifactConfig;
use crate::error::{Result, ScoringError};
use crate::models::pipeline::PipelinePredictor;
use crate::models::predictor::Predictor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Where to look for the model artifact
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactSource {
    /// User-supplied path; when set, no other location is consulted
    pub explicit: Option<PathBuf>,
    /// Default locations, tried in order
    pub candidates: Vec<PathBuf>,
    /// Remote fallback when no local candidate exists
    pub url: Option<String>,
    /// Where a downloaded artifact is stored
    pub cache_path: PathBuf,
}

impl ArtifactSource {
    /// Build the search order from configuration.
    ///
    /// Candidates are `<search dir>/<file name>` for each configured
    /// directory, then `artifacts/<file name>` next to the executable.
    pub fn from_config(config: &ArtifactConfig) -> Self {
        let mut candidates: Vec<PathBuf> = config
            .search_dirs
            .iter()
            .map(|dir| Path::new(dir).join(&config.file_name))
            .collect();

        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let beside_exe = exe_dir.join("artifacts").join(&config.file_name);
            if !candidates.contains(&beside_exe) {
                candidates.push(beside_exe);
            }
        }

        Self {
            explicit: config.path.as_ref().map(PathBuf::from),
            candidates,
            url: config.url.clone(),
            cache_path: Path::new(&config.cache_dir).join(&config.file_name),
        }
    }

    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Loader for model artifacts
pub struct ModelLoader {
    /// Bound on the artifact download; `None` waits indefinitely
    download_timeout: Option<Duration>,
    /// Intra-op threads for the ONNX backend
    onnx_threads: usize,
    /// Input column order for ONNX models
    onnx_features: Vec<String>,
}

impl ModelLoader {
    pub fn new() -> Self {
        Self {
            download_timeout: None,
            onnx_threads: 1,
            onnx_features: Vec::new(),
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self {
            download_timeout: config.download_timeout_secs.map(Duration::from_secs),
            onnx_threads: config.onnx_threads,
            onnx_features: config.onnx_features.clone(),
        }
    }

    /// Resolve exactly one existing artifact path, downloading it if needed
    pub fn resolve(&self, source: &ArtifactSource) -> Result<PathBuf> {
        if let Some(explicit) = &source.explicit {
            if explicit.exists() {
                return Ok(explicit.clone());
            }
            warn!(path = %explicit.display(), "Model path does not exist");
            return Err(ScoringError::ArtifactNotFound {
                tried: vec![explicit.clone()],
            });
        }

        if let Some(found) = source.candidates.iter().find(|p| p.exists()) {
            return Ok(found.clone());
        }

        if let Some(url) = &source.url {
            return self.download(url, &source.cache_path);
        }

        Err(ScoringError::ArtifactNotFound {
            tried: source.candidates.clone(),
        })
    }

    /// Fetch the artifact into `dest`, creating parent directories.
    ///
    /// Single attempt, no retry. The body goes to `<dest>.part` first and is
    /// renamed into place, so `dest` only ever holds a complete download.
    pub fn download(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        info!(url = %url, dest = %dest.display(), "Downloading model artifact");

        let download_err = |source: reqwest::Error| ScoringError::Download {
            url: url.to_string(),
            source,
        };

        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(concat!("flow-duration-scoring/", env!("CARGO_PKG_VERSION")));
        // reqwest's blocking client defaults to 30s; keep "no timeout" unless configured
        builder = builder.timeout(self.download_timeout);
        let client = builder.build().map_err(download_err)?;

        let bytes = client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.bytes())
            .map_err(download_err)?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let partial = partial_path(dest);
        let written = std::fs::write(&partial, &bytes).and_then(|_| std::fs::rename(&partial, dest));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }

        info!(bytes = bytes.len(), dest = %dest.display(), "Model artifact downloaded");
        Ok(dest.to_path_buf())
    }

    /// Deserialize the artifact at `path` into a predictor
    pub fn load_from_path(&self, path: &Path) -> Result<Box<dyn Predictor>> {
        info!(path = %path.display(), "Loading model artifact");

        let is_onnx = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("onnx"))
            .unwrap_or(false);

        if is_onnx {
            return self.load_onnx(path);
        }

        let predictor = PipelinePredictor::load(path)?;
        Ok(Box::new(predictor))
    }

    /// Resolve then load
    pub fn load(&self, source: &ArtifactSource) -> Result<Box<dyn Predictor>> {
        let path = self.resolve(source)?;
        info!(path = %path.display(), "Using model");
        self.load_from_path(&path)
    }

    #[cfg(feature = "onnx")]
    fn load_onnx(&self, path: &Path) -> Result<Box<dyn Predictor>> {
        let predictor = crate::models::onnx::OnnxPredictor::load(
            path,
            self.onnx_threads,
            self.onnx_features.clone(),
        )?;
        Ok(Box::new(predictor))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_onnx(&self, path: &Path) -> Result<Box<dyn Predictor>> {
        warn!(
            threads = self.onnx_threads,
            features = self.onnx_features.len(),
            "ONNX artifact requested but the onnx feature is disabled"
        );
        Err(ScoringError::deserialization(
            path,
            "ONNX artifacts need a build with the `onnx` feature",
        ))
    }
}

/// In-progress download location for `dest`
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pipeline::{Estimator, FeatureSpec, PipelineArtifact, PIPELINE_FORMAT_VERSION};
    use crate::types::FeatureRow;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn test_artifact() -> PipelineArtifact {
        PipelineArtifact {
            format_version: PIPELINE_FORMAT_VERSION,
            name: Some("test".to_string()),
            features: vec![FeatureSpec::Numeric {
                name: "x".to_string(),
                center: 0.0,
                scale: 1.0,
                impute: None,
            }],
            estimator: Estimator::Linear {
                intercept: 0.0,
                coefficients: vec![1.0],
            },
        }
    }

    fn write_artifact(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(&test_artifact()).unwrap()).unwrap();
        path
    }

    /// Answer a single HTTP request on a local port
    fn serve_once(status: &'static str, body: Vec<u8>) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/model.json", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
        });

        (url, handle)
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = write_artifact(dir.path(), "explicit.json");
        let candidate = write_artifact(dir.path(), "candidate.json");

        let source = ArtifactSource {
            candidates: vec![candidate],
            ..Default::default()
        }
        .with_explicit(&explicit);

        assert_eq!(ModelLoader::new().resolve(&source).unwrap(), explicit);
    }

    #[test]
    fn test_missing_explicit_path_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = write_artifact(dir.path(), "candidate.json");
        let missing = dir.path().join("nope.json");

        let source = ArtifactSource {
            candidates: vec![candidate],
            ..Default::default()
        }
        .with_explicit(&missing)
        .with_url("http://127.0.0.1:9/model.json");

        match ModelLoader::new().resolve(&source) {
            Err(ScoringError::ArtifactNotFound { tried }) => assert_eq!(tried, vec![missing]),
            other => panic!("expected ArtifactNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let second = write_artifact(dir.path(), "second.json");

        let source = ArtifactSource {
            candidates: vec![dir.path().join("first.json"), second.clone()],
            ..Default::default()
        };
        assert_eq!(ModelLoader::new().resolve(&source).unwrap(), second);
    }

    #[test]
    fn test_not_found_lists_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![dir.path().join("a.json"), dir.path().join("b.json")];
        let source = ArtifactSource {
            candidates: candidates.clone(),
            ..Default::default()
        };

        match ModelLoader::new().resolve(&source) {
            Err(ScoringError::ArtifactNotFound { tried }) => assert_eq!(tried, candidates),
            other => panic!("expected ArtifactNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_url_fallback_downloads_into_cache() {
        let dir = tempfile::tempdir().unwrap();
        let body = serde_json::to_vec(&test_artifact()).unwrap();
        let (url, server) = serve_once("200 OK", body.clone());

        let cache_path = dir.path().join("cache").join("model.json");
        let source = ArtifactSource {
            candidates: vec![dir.path().join("missing.json")],
            cache_path: cache_path.clone(),
            ..Default::default()
        }
        .with_url(url);

        let predictor = ModelLoader::new().load(&source).unwrap();
        server.join().unwrap();

        assert_eq!(predictor.name(), "test");
        assert_eq!(std::fs::read(&cache_path).unwrap(), body);
        assert!(!partial_path(&cache_path).exists());
    }

    #[test]
    fn test_failed_download_leaves_no_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = serve_once("404 Not Found", b"missing".to_vec());

        let cache_path = dir.path().join("cache").join("model.json");
        let source = ArtifactSource {
            cache_path: cache_path.clone(),
            ..Default::default()
        }
        .with_url(url.clone());

        let err = ModelLoader::new().resolve(&source).unwrap_err();
        server.join().unwrap();

        match err {
            ScoringError::Download { url: failed, .. } => assert_eq!(failed, url),
            other => panic!("expected Download, got {:?}", other),
        }
        assert!(!cache_path.exists());
        assert!(!partial_path(&cache_path).exists());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("artifacts/model.json")),
            Path::new("artifacts/model.json.part")
        );
    }

    #[test]
    fn test_load_json_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "model.json");
        let source = ArtifactSource::default().with_explicit(&path);

        let predictor = ModelLoader::new().load(&source).unwrap();
        assert_eq!(predictor.name(), "test");

        let rows = vec![FeatureRow::from_pairs([("x", 0.75)])];
        assert_eq!(predictor.predict(&rows).unwrap(), vec![0.75]);
    }

    #[test]
    fn test_corrupt_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.joblib");
        std::fs::write(&path, b"\x80\x04\x95\x00\x00").unwrap();

        let err = ModelLoader::new().load_from_path(&path).err().unwrap();
        assert!(matches!(err, ScoringError::Deserialization { .. }));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_requires_feature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"onnx").unwrap();

        let err = ModelLoader::new().load_from_path(&path).err().unwrap();
        assert!(err.to_string().contains("onnx"));
    }

    #[test]
    fn test_source_from_config() {
        let config = ArtifactConfig {
            file_name: "model.json".to_string(),
            search_dirs: vec!["artifacts".to_string(), "../artifacts".to_string()],
            cache_dir: "cache".to_string(),
            url: Some("https://example.com/model.json".to_string()),
            ..Default::default()
        };
        let source = ArtifactSource::from_config(&config);

        assert_eq!(source.candidates[0], Path::new("artifacts/model.json"));
        assert_eq!(source.candidates[1], Path::new("../artifacts/model.json"));
        assert_eq!(source.cache_path, Path::new("cache/model.json"));
        assert_eq!(source.url.as_deref(), Some("https://example.com/model.json"));
        assert!(source.explicit.is_none());
    }
}
