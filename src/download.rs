use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use rayon::prelude::*;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::MaxFileAge;
use crate::error::CosmicError;

pub trait CosmicFileClient: Send + Sync {
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<(), CosmicError>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone)]
pub struct CosmicHttpClient {
    client: Client,
    credentials: Option<Credentials>,
}

impl CosmicHttpClient {
    pub fn new(credentials: Option<Credentials>) -> Result<Self, CosmicError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cosmic-update/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CosmicError::DownloadHttp(err.to_string()))?,
        );
        // Export archives run to several gigabytes; only the connect phase is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(60))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| CosmicError::DownloadHttp(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

impl CosmicFileClient for CosmicHttpClient {
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<(), CosmicError> {
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.user, Some(&credentials.password));
        }
        let mut response = request
            .send()
            .map_err(|err| CosmicError::DownloadHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "COSMIC download failed".to_string());
            return Err(CosmicError::DownloadStatus { status, message });
        }
        create_parent(destination)?;
        let partial = partial_path(destination);
        let mut file = File::create(partial.as_std_path())
            .map_err(|err| CosmicError::Filesystem(format!("create {partial}: {err}")))?;
        if let Err(err) = io::copy(&mut response, &mut file) {
            drop(file);
            discard_partial(&partial);
            return Err(CosmicError::DownloadHttp(format!("{url}: {err}")));
        }
        fs::rename(partial.as_std_path(), destination.as_std_path())
            .map_err(|err| CosmicError::Filesystem(format!("rename {partial}: {err}")))?;
        Ok(())
    }
}

/// One reference file: where it is read from, and where it can be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSource {
    pub path: Utf8PathBuf,
    pub url: Option<String>,
}

impl ReferenceSource {
    pub fn archive(&self) -> Utf8PathBuf {
        archive_path(&self.path)
    }
}

pub fn archive_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.gz"))
}

/// True when `path` is missing or older than `max_age` at `now`.
pub fn needs_download(
    path: &Utf8Path,
    max_age: MaxFileAge,
    now: SystemTime,
) -> Result<bool, CosmicError> {
    let Some(modified) = modified_time(path)? else {
        return Ok(true);
    };
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    Ok(age > max_age.as_duration())
}

/// Decompresses `archive` into `destination`, returning the decompressed size.
pub fn gunzip(archive: &Utf8Path, destination: &Utf8Path) -> Result<u64, CosmicError> {
    let input = File::open(archive.as_std_path())
        .map_err(|err| CosmicError::Decompress(format!("open {archive}: {err}")))?;
    create_parent(destination)?;
    let partial = partial_path(destination);
    let output = File::create(partial.as_std_path())
        .map_err(|err| CosmicError::Filesystem(format!("create {partial}: {err}")))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(output);
    let size = match io::copy(&mut decoder, &mut writer) {
        Ok(size) => size,
        Err(err) => {
            drop(writer);
            discard_partial(&partial);
            return Err(CosmicError::Decompress(format!("{archive}: {err}")));
        }
    };
    writer
        .into_inner()
        .map_err(|err| CosmicError::Filesystem(format!("flush {partial}: {err}")))?;
    fs::rename(partial.as_std_path(), destination.as_std_path())
        .map_err(|err| CosmicError::Filesystem(format!("rename {partial}: {err}")))?;
    Ok(size)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrepareSummary {
    pub downloaded: usize,
    pub fresh: usize,
    pub decompressed: usize,
}

pub struct ReferenceDownloader<'a, C: CosmicFileClient + ?Sized> {
    client: &'a C,
    max_age: MaxFileAge,
    skip_download: bool,
}

impl<'a, C: CosmicFileClient + ?Sized> ReferenceDownloader<'a, C> {
    pub fn new(client: &'a C, max_age: MaxFileAge) -> Self {
        Self {
            client,
            max_age,
            skip_download: false,
        }
    }

    /// Leaves the network alone; archives already on disk are still decompressed.
    pub fn skip_download(mut self, skip: bool) -> Self {
        self.skip_download = skip;
        self
    }

    /// Downloads stale archives one after another, then decompresses them in parallel.
    pub fn prepare(&self, sources: &[ReferenceSource]) -> Result<PrepareSummary, CosmicError> {
        let mut summary = PrepareSummary::default();
        let now = SystemTime::now();

        for source in sources {
            let Some(url) = &source.url else {
                continue;
            };
            if self.skip_download {
                continue;
            }
            let archive = source.archive();
            if needs_download(&archive, self.max_age, now)? {
                info!(%url, path = %archive, "downloading");
                self.client.download(url, &archive)?;
                summary.downloaded += 1;
            } else {
                info!(path = %archive, "archive is fresh; not downloading");
                summary.fresh += 1;
            }
        }

        let jobs = sources
            .iter()
            .map(|source| (source.archive(), source.path.clone()))
            .filter(|(archive, path)| is_newer(archive, path))
            .collect::<Vec<_>>();
        jobs.par_iter()
            .map(|(archive, path)| -> Result<(), CosmicError> {
                let size = gunzip(archive, path)?;
                info!(path = %path, bytes = size, "decompressed");
                Ok(())
            })
            .collect::<Result<Vec<()>, _>>()?;
        summary.decompressed = jobs.len();
        Ok(summary)
    }
}

fn is_newer(archive: &Utf8Path, path: &Utf8Path) -> bool {
    match (modified_time(archive), modified_time(path)) {
        (Ok(Some(archive_time)), Ok(Some(path_time))) => archive_time > path_time,
        (Ok(Some(_)), _) => true,
        _ => {
            debug!(%archive, "no archive to decompress");
            false
        }
    }
}

fn modified_time(path: &Utf8Path) -> Result<Option<SystemTime>, CosmicError> {
    match fs::metadata(path.as_std_path()) {
        Ok(metadata) => metadata
            .modified()
            .map(Some)
            .map_err(|err| CosmicError::Filesystem(format!("mtime {path}: {err}"))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CosmicError::Filesystem(format!("stat {path}: {err}"))),
    }
}

fn partial_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.part"))
}

fn discard_partial(partial: &Utf8Path) {
    if let Err(err) = fs::remove_file(partial.as_std_path()) {
        warn!(path = %partial, error = %err, "could not remove partial file");
    }
}

fn create_parent(path: &Utf8Path) -> Result<(), CosmicError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CosmicError::Filesystem(format!("create {parent}: {err}")))?;
        }
    }
    Ok(())
}
