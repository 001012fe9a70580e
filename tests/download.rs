use std::fs;
use std::io::Write;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use cosmic_update::domain::MaxFileAge;
use cosmic_update::download::{CosmicFileClient, ReferenceDownloader, ReferenceSource};
use cosmic_update::error::CosmicError;

#[derive(Default)]
struct RecordingClient {
    urls: Mutex<Vec<String>>,
}

impl CosmicFileClient for RecordingClient {
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<(), CosmicError> {
        self.urls.lock().unwrap().push(url.to_string());
        fs::write(destination, gzip("FUSION_ID\n6321\n"))
            .map_err(|err| CosmicError::Filesystem(err.to_string()))
    }
}

struct RejectingClient;

impl CosmicFileClient for RejectingClient {
    fn download(&self, _url: &str, _destination: &Utf8Path) -> Result<(), CosmicError> {
        Err(CosmicError::DownloadStatus {
            status: 401,
            message: "Unauthorized".to_string(),
        })
    }
}

fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn source(root: &Utf8Path, name: &str) -> ReferenceSource {
    ReferenceSource {
        path: root.join(name),
        url: Some(format!("https://example.org/{name}.gz")),
    }
}

fn root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8Path::from_path(temp.path()).unwrap().to_path_buf()
}

#[test]
fn fresh_archives_are_not_downloaded_again() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let sources = vec![source(&root, "CosmicFusionExport.tsv")];
    let client = RecordingClient::default();
    let downloader = ReferenceDownloader::new(&client, MaxFileAge::default());

    let first = downloader.prepare(&sources).unwrap();
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.decompressed, 1);
    assert_eq!(
        fs::read_to_string(&sources[0].path).unwrap(),
        "FUSION_ID\n6321\n"
    );

    let second = downloader.prepare(&sources).unwrap();
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.fresh, 1);
    assert_eq!(client.urls.lock().unwrap().len(), 1);
}

#[test]
fn skip_download_still_decompresses_local_archives() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let present = source(&root, "CosmicFusionExport.tsv");
    let absent = source(&root, "CosmicMutantExport.tsv");
    fs::write(present.archive(), gzip("FUSION_ID\n")).unwrap();

    let client = RecordingClient::default();
    let summary = ReferenceDownloader::new(&client, MaxFileAge::default())
        .skip_download(true)
        .prepare(&[present.clone(), absent.clone()])
        .unwrap();

    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.decompressed, 1);
    assert!(client.urls.lock().unwrap().is_empty());
    assert!(present.path.exists());
    assert!(!absent.path.exists());
}

#[test]
fn rejected_download_aborts_preparation() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let sources = vec![source(&root, "CosmicMutationTracking.tsv")];
    assert_matches!(
        ReferenceDownloader::new(&RejectingClient, MaxFileAge::default()).prepare(&sources),
        Err(CosmicError::DownloadStatus { status: 401, .. })
    );
}
