// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! WebDAV client for a Nextcloud/ownCloud style file server.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use percent_encoding::percent_decode_str;
use reqwest::{Method, StatusCode, Url};
use tokio::fs as tokiofs;

use crate::adapters::remote_fs::{BoxFuture, RemoteEntry, RemoteFs};

mod storage;

pub use storage::RemoteStorage;

const DAV_NS: &str = "DAV:";
const SHARE_ENDPOINT: &str = "ocs/v2.php/apps/files_sharing/api/v1/shares";
/// Public link share, read-only.
const SHARE_TYPE_PUBLIC: &str = "3";
const PERMISSION_READ: &str = "1";

/// Login to the file server.
#[derive(Clone)]
pub struct WebDavCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for WebDavCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct WebDavConnection {
    client: reqwest::Client,
    credentials: WebDavCredentials,
    host: Url,
    files_root: Url,
}

impl WebDavConnection {
    pub fn new(credentials: WebDavCredentials, timeout: Duration) -> Result<Self> {
        let host = Url::parse(&format!("{}/", credentials.host.trim_end_matches('/')))
            .with_context(|| format!("invalid storage host {:?}", credentials.host))?;
        let mut files_root = host.clone();
        files_root
            .path_segments_mut()
            .map_err(|_| anyhow!("storage host cannot be a base URL"))?
            .pop_if_empty()
            .extend(["remote.php", "dav", "files", credentials.username.as_str()]);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            credentials,
            host,
            files_root,
        })
    }

    /// `{host}/remote.php/dav/files/{user}`.
    pub fn base_url(&self) -> &Url {
        &self.files_root
    }

    /// URL of a path below the user's file root. Segments are encoded.
    fn url_for(&self, path: &str) -> Result<Url> {
        let mut url = self.files_root.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("storage URL cannot be a base"))?;
            segments.pop_if_empty();
            for seg in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
                segments.push(seg);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    async fn propfind(&self, path: &str, depth: &str) -> Result<String> {
        let url = self.url_for(path)?;
        let method = Method::from_bytes(b"PROPFIND").context("PROPFIND method")?;
        let response = self
            .request(method, url.clone())
            .header("Depth", depth)
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .with_context(|| format!("PROPFIND {url}"))?;
        let status = response.status();
        if status != StatusCode::MULTI_STATUS && !status.is_success() {
            bail!("PROPFIND {url} returned {status}");
        }
        Ok(response.text().await?)
    }

    /// Creates a public read-only link for `path`. `None` when the server
    /// does not answer with 200 or the answer carries no URL.
    pub async fn share(&self, path: &str) -> Result<Option<String>> {
        let url = self
            .host
            .join(SHARE_ENDPOINT)
            .context("building share URL")?;
        let path = format!("/{}", path.trim_start_matches('/'));
        let response = self
            .request(Method::POST, url)
            .header("OCS-APIRequest", "true")
            .form(&[
                ("path", path.as_str()),
                ("shareType", SHARE_TYPE_PUBLIC),
                ("permissions", PERMISSION_READ),
            ])
            .send()
            .await
            .context("share request")?;
        if response.status() != StatusCode::OK {
            tracing::warn!("share of {path} refused with {}", response.status());
            return Ok(None);
        }
        let body = response.text().await?;
        Ok(parse_share_response(&body))
    }
}

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

/// `ocs/data/url` of a share response.
pub(crate) fn parse_share_response(xml: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(xml).ok()?;
    doc.descendants()
        .filter(|n| n.has_tag_name("url"))
        .find(|n| n.parent().is_some_and(|p| p.has_tag_name("data")))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Decoded href path and collection flag of every `response` element.
pub(crate) fn parse_multistatus(xml: &str) -> Result<Vec<(String, bool)>> {
    let doc = roxmltree::Document::parse(xml).context("parsing multistatus")?;
    let mut out = Vec::new();
    for response in doc
        .descendants()
        .filter(|n| n.has_tag_name((DAV_NS, "response")))
    {
        let Some(href) = response
            .children()
            .find(|n| n.has_tag_name((DAV_NS, "href")))
            .and_then(|n| n.text())
        else {
            continue;
        };
        let is_dir = response
            .descendants()
            .any(|n| n.has_tag_name((DAV_NS, "collection")));
        out.push((decode_href(href.trim()), is_dir));
    }
    Ok(out)
}

/// Path part of an href, percent-decoded, without trailing slash.
fn decode_href(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let decoded = percent_decode_str(&path).decode_utf8_lossy().into_owned();
    decoded.trim_end_matches('/').to_string()
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl RemoteFs for WebDavConnection {
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let body = self.propfind(path, "0").await?;
            let entries = parse_multistatus(&body)?;
            let (_, is_dir) = entries
                .first()
                .ok_or_else(|| anyhow!("empty PROPFIND answer for {path}"))?;
            Ok(*is_dir)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.url_for(path)?;
            let method = Method::from_bytes(b"MKCOL").context("MKCOL method")?;
            let response = self
                .request(method, url.clone())
                .send()
                .await
                .with_context(|| format!("MKCOL {url}"))?;
            let status = response.status();
            // 405 means the collection is already there.
            if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
                bail!("MKCOL {url} returned {status}");
            }
            Ok(())
        })
    }

    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<RemoteEntry>>> {
        Box::pin(async move {
            let body = self.propfind(path, "1").await?;
            let own = decode_href(self.url_for(path)?.path());
            Ok(parse_multistatus(&body)?
                .into_iter()
                .filter(|(href, _)| *href != own)
                .map(|(href, is_dir)| RemoteEntry {
                    name: last_segment(&href).to_string(),
                    is_dir,
                })
                .filter(|e| !e.name.is_empty())
                .collect())
        })
    }

    fn upload_file<'a>(&'a self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.url_for(remote)?;
            let bytes = tokiofs::read(local)
                .await
                .with_context(|| format!("reading {}", local.display()))?;
            tracing::debug!("PUT {} -> {url}", local.display());
            let response = self
                .request(Method::PUT, url.clone())
                .body(bytes)
                .send()
                .await
                .with_context(|| format!("PUT {url}"))?;
            if !response.status().is_success() {
                bail!("PUT {url} returned {}", response.status());
            }
            Ok(())
        })
    }

    fn download_file<'a>(&'a self, remote: &'a str, local: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.url_for(remote)?;
            let response = self
                .request(Method::GET, url.clone())
                .send()
                .await
                .with_context(|| format!("GET {url}"))?;
            if !response.status().is_success() {
                bail!("GET {url} returned {}", response.status());
            }
            let bytes = response.bytes().await?;
            if let Some(parent) = local.parent() {
                tokiofs::create_dir_all(parent).await?;
            }
            tokiofs::write(local, &bytes)
                .await
                .with_context(|| format!("writing {}", local.display()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> WebDavConnection {
        WebDavConnection::new(
            WebDavCredentials {
                host: "https://cloud.example.org/".into(),
                username: "bot".into(),
                password: "pw".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn base_url_points_at_user_files() {
        let conn = connection();
        assert_eq!(
            conn.base_url().as_str(),
            "https://cloud.example.org/remote.php/dav/files/bot"
        );
        assert_eq!(
            conn.url_for("/calcs/1_2_water dimer").unwrap().as_str(),
            "https://cloud.example.org/remote.php/dav/files/bot/calcs/1_2_water%20dimer"
        );
        assert_eq!(
            format!("{:?}", conn.credentials),
            r#"WebDavCredentials { host: "https://cloud.example.org/", username: "bot", password: "<redacted>" }"#
        );
    }

    #[test]
    fn share_response_yields_url() {
        let xml = r#"<?xml version="1.0"?>
<ocs>
 <meta><status>ok</status><statuscode>200</statuscode></meta>
 <data>
  <id>36</id>
  <share_type>3</share_type>
  <url>https://cloud.example.org/s/AbCdEf</url>
 </data>
</ocs>"#;
        assert_eq!(
            parse_share_response(xml),
            Some("https://cloud.example.org/s/AbCdEf".to_string())
        );
        assert_eq!(parse_share_response("<ocs><data/></ocs>"), None);
        assert_eq!(parse_share_response("not xml"), None);
    }

    #[test]
    fn multistatus_lists_collections_and_files() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
 <d:response>
  <d:href>/remote.php/dav/files/bot/calcs/</d:href>
  <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
 </d:response>
 <d:response>
  <d:href>/remote.php/dav/files/bot/calcs/out%20file.log</d:href>
  <d:propstat><d:prop><d:resourcetype/></d:prop></d:propstat>
 </d:response>
 <d:response>
  <d:href>https://cloud.example.org/remote.php/dav/files/bot/calcs/sub/</d:href>
  <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
 </d:response>
</d:multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(
            entries,
            vec![
                ("/remote.php/dav/files/bot/calcs".to_string(), true),
                ("/remote.php/dav/files/bot/calcs/out file.log".to_string(), false),
                ("/remote.php/dav/files/bot/calcs/sub".to_string(), true),
            ]
        );
        assert_eq!(last_segment(&entries[1].0), "out file.log");
    }
}
