//! WebDAV client for a Nextcloud account.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use url::Url;

use super::propfind::{parse_multistatus, percent_decode, DavEntry, PROPFIND_BODY};
use super::{Result, WebDavError};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const LIST_TIMEOUT_SECS: u64 = 30;
const TRANSFER_TIMEOUT_SECS: u64 = 60;
const MKCOL_TIMEOUT_SECS: u64 = 30;

/// Result of a folder creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStatus {
    Created,
    /// The server answered 405: the collection is already there.
    AlreadyExists,
}

/// Client bound to one user's files under `remote.php/dav/files/<user>/`.
pub struct NextcloudClient {
    client: Client,
    username: String,
    password: String,
    webdav_url: Url,
}

impl NextcloudClient {
    pub fn new(server_url: &str, username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let server_url = server_url.trim_end_matches('/');
        let webdav_url = Url::parse(&format!("{}/remote.php/dav/files/{}/", server_url, username))?;

        Ok(Self {
            client: Client::new(),
            username,
            password: password.into(),
            webdav_url,
        })
    }

    /// Root of the user's files.
    pub fn webdav_url(&self) -> &Url {
        &self.webdav_url
    }

    /// Resolve a path relative to the user's root.
    ///
    /// Leading slashes are ignored so `/docs` and `docs` name the same folder.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.webdav_url.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, url: Url, timeout_secs: u64) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .timeout(Duration::from_secs(timeout_secs))
    }

    /// Check that the credentials reach the user's root.
    pub async fn test_connection(&self) -> Result<()> {
        let response = self
            .request(Method::GET, self.webdav_url.clone(), CONNECT_TIMEOUT_SECS)
            .send()
            .await?;

        expect_status(response.status(), &[StatusCode::OK], "Connection test")?;
        tracing::info!(url = %self.webdav_url, "Connected to Nextcloud");
        Ok(())
    }

    /// List the direct children of `path` (empty for the root).
    pub async fn list_files(&self, path: &str) -> Result<Vec<DavEntry>> {
        let url = self.resolve(path)?;
        let method = dav_method("PROPFIND")?;

        let response = self
            .request(method, url.clone(), LIST_TIMEOUT_SECS)
            .header("Depth", "1")
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await?;

        expect_status(response.status(), &[StatusCode::MULTI_STATUS], "Listing")?;
        let body = response.text().await?;

        let listed = normalized_path(url.path());
        let entries: Vec<DavEntry> = parse_multistatus(&body)
            .into_iter()
            .filter(|entry| normalized_path(&entry.href) != listed)
            .collect();

        tracing::debug!(path, count = entries.len(), "Listed folder");
        Ok(entries)
    }

    /// Upload a local file to `remote_path`.
    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(WebDavError::LocalFileNotFound(local_path.to_path_buf()));
        }

        let url = self.resolve(remote_path)?;
        let content = tokio::fs::read(local_path).await?;
        let response = self
            .request(Method::PUT, url, TRANSFER_TIMEOUT_SECS)
            .body(content)
            .send()
            .await?;

        expect_status(response.status(), &[StatusCode::CREATED, StatusCode::NO_CONTENT], "Upload")?;
        tracing::info!(local = %local_path.display(), remote = remote_path, "Uploaded file");
        Ok(())
    }

    /// Download `remote_path` into `local_path`, creating parent folders.
    ///
    /// Returns the number of bytes written.
    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<usize> {
        let url = self.resolve(remote_path)?;
        let response = self
            .request(Method::GET, url, TRANSFER_TIMEOUT_SECS)
            .send()
            .await?;

        expect_status(response.status(), &[StatusCode::OK], "Download")?;
        let bytes = response.bytes().await?;

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &bytes).await?;

        tracing::info!(remote = remote_path, local = %local_path.display(), "Downloaded file");
        Ok(bytes.len())
    }

    /// Create a folder. An existing folder counts as success.
    pub async fn create_folder(&self, folder_path: &str) -> Result<FolderStatus> {
        let url = self.resolve(folder_path)?;
        let method = dav_method("MKCOL")?;

        let response = self.request(method, url, MKCOL_TIMEOUT_SECS).send().await?;

        match response.status() {
            StatusCode::CREATED => {
                tracing::info!(folder = folder_path, "Created folder");
                Ok(FolderStatus::Created)
            }
            StatusCode::METHOD_NOT_ALLOWED => {
                tracing::info!(folder = folder_path, "Folder already exists");
                Ok(FolderStatus::AlreadyExists)
            }
            other => Err(WebDavError::Status {
                operation: "Folder creation",
                status: other.as_u16(),
            }),
        }
    }
}

fn dav_method(name: &'static str) -> Result<Method> {
    Method::from_bytes(name.as_bytes()).map_err(|_| WebDavError::UnsupportedMethod(name))
}

fn expect_status(status: StatusCode, accepted: &[StatusCode], operation: &'static str) -> Result<()> {
    if accepted.contains(&status) {
        Ok(())
    } else {
        Err(WebDavError::Status {
            operation,
            status: status.as_u16(),
        })
    }
}

fn normalized_path(path: &str) -> String {
    let path = path.split("://").nth(1).map_or(path, |rest| {
        rest.find('/').map_or("/", |i| &rest[i..])
    });
    format!("{}/", percent_decode(path).trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NextcloudClient {
        NextcloudClient::new(&format!("{}/", server.uri()), "alice", "s3cret").unwrap()
    }

    #[test]
    fn test_webdav_url_layout() {
        let client = NextcloudClient::new("https://cloud.example.com/", "alice", "pw").unwrap();
        assert_eq!(
            client.webdav_url().as_str(),
            "https://cloud.example.com/remote.php/dav/files/alice/"
        );
        assert_eq!(
            client.resolve("test_folder/uploaded_test.txt").unwrap().as_str(),
            "https://cloud.example.com/remote.php/dav/files/alice/test_folder/uploaded_test.txt"
        );
        assert_eq!(client.resolve("/docs/").unwrap(), client.resolve("docs/").unwrap());
        assert_eq!(client.resolve("").unwrap(), *client.webdav_url());
    }

    #[test]
    fn test_normalized_path() {
        assert_eq!(normalized_path("/a/b"), "/a/b/");
        assert_eq!(normalized_path("/a/b/"), "/a/b/");
        assert_eq!(normalized_path("https://h.example/a%20b/"), "/a b/");
    }

    #[tokio::test]
    async fn test_connection_ok_and_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/remote.php/dav/files/alice/"))
            .and(basic_auth("alice", "s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client(&server).test_connection().await.unwrap();

        let wrong = NextcloudClient::new(&server.uri(), "alice", "nope").unwrap();
        let err = wrong.test_connection().await.unwrap_err();
        assert!(matches!(err, WebDavError::Status { status: 404, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_list_files_excludes_listed_folder() {
        let server = MockServer::start().await;
        let body = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
 <d:response><d:href>/remote.php/dav/files/alice/test_folder/</d:href>
  <d:propstat><d:prop><d:displayname>test_folder</d:displayname><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
 </d:response>
 <d:response><d:href>/remote.php/dav/files/alice/test_folder/uploaded_test.txt</d:href>
  <d:propstat><d:prop><d:displayname>uploaded_test.txt</d:displayname><d:getcontentlength>12</d:getcontentlength><d:resourcetype/></d:prop></d:propstat>
 </d:response>
</d:multistatus>"#;
        Mock::given(method("PROPFIND"))
            .and(path("/remote.php/dav/files/alice/test_folder/"))
            .and(header("Depth", "1"))
            .respond_with(ResponseTemplate::new(207).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let entries = client(&server).list_files("test_folder/").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "uploaded_test.txt");
        assert_eq!(entries[0].size, Some(12));
    }

    #[tokio::test]
    async fn test_list_files_wrong_status() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).list_files("").await.unwrap_err();
        assert!(matches!(err, WebDavError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_upload_file() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/remote.php/dav/files/alice/test_folder/uploaded_test.txt"))
            .and(body_bytes(b"hello nextcloud".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("test_file.txt");
        std::fs::write(&local, b"hello nextcloud").unwrap();

        client(&server)
            .upload_file(&local, "test_folder/uploaded_test.txt")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_missing_local_file() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");

        let err = client(&server)
            .upload_file(&missing, "x.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, WebDavError::LocalFileNotFound(p) if p == missing));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_creates_parent_dirs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/remote.php/dav/files/alice/test_folder/uploaded_test.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("downloads").join("downloaded_test.txt");

        let written = client(&server)
            .download_file("test_folder/uploaded_test.txt", &local)
            .await
            .unwrap();

        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_download_not_found_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("out.txt");
        let err = client(&server).download_file("nope.txt", &local).await.unwrap_err();

        assert!(matches!(err, WebDavError::Status { status: 404, .. }));
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_create_folder_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("MKCOL"))
            .and(path("/remote.php/dav/files/alice/new/"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(path("/remote.php/dav/files/alice/existing/"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(path("/remote.php/dav/files/alice/locked/"))
            .respond_with(ResponseTemplate::new(423))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.create_folder("new/").await.unwrap(), FolderStatus::Created);
        assert_eq!(client.create_folder("existing/").await.unwrap(), FolderStatus::AlreadyExists);
        let err = client.create_folder("locked/").await.unwrap_err();
        assert!(matches!(err, WebDavError::Status { status: 423, .. }));
    }
}
