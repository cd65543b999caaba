//! Device Client — connection-pooling HTTP client for the dashcam's CGI
//! surface and file streaming endpoints.

mod parse;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures::Stream;
use reqwest::Client;

use crate::config::Config;
use crate::error::ClientError;

pub use parse::{parse_capability, parse_count, parse_file_list};

const CGI_USER_AGENT: &str = "Dalvik/2.1.0 (Linux; U; Android 9; KFONWI Build/PS7331.4463N)";
const STREAM_USER_AGENT: &str = "Lavf/57.83.100";
const TRANSPORT_RETRIES: u32 = 3;

/// Thin, connection-pooling HTTP client for the dashcam's `/cgi-bin/hisnet/*`
/// surface. Owns the TCP connection pool, default headers, and the session
/// cookie, which starts as the literal `"null"` and is preserved verbatim —
/// the device appears to require it and it's unclear whether a well-formed
/// id would be accepted.
pub struct DeviceClient {
    http: Client,
    base_url: String,
    session_id: StdMutex<String>,
}

impl DeviceClient {
    pub fn new(base_url: impl Into<String>, connection_timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .connect_timeout(connection_timeout)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            session_id: StdMutex::new("null".to_string()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        Self::new(config.base_url(), config.connection_timeout)
    }

    fn cgi_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_cookie(&self) -> String {
        format!("SessionID={}", self.session_id.lock().unwrap())
    }

    /// GET a CGI endpoint with the fixed non-download header set, retrying
    /// transient transport errors up to `TRANSPORT_RETRIES` times. Distinct
    /// from the Download Orchestrator's task-level retry.
    async fn get_text(&self, url: String, query: &[(&str, &str)]) -> Result<String, ClientError> {
        let cookie = self.session_cookie();
        let mut last_err = None;

        for attempt in 0..TRANSPORT_RETRIES {
            let mut builder = self
                .http
                .get(&url)
                .header("Accept-Encoding", "gzip")
                .header("Cookie", &cookie)
                .header("Connection", "keep-alive")
                .header("User-Agent", CGI_USER_AGENT);
            if !query.is_empty() {
                builder = builder.query(query);
            }

            match builder.send().await.and_then(reqwest::Response::error_for_status) {
                Ok(resp) => match resp.text().await {
                    Ok(text) => return Ok(text),
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }

            if attempt + 1 < TRANSPORT_RETRIES {
                log::debug!("[client] transient error on {url}, attempt {attempt}, retrying");
            }
        }

        Err(ClientError::Transport(last_err.unwrap()))
    }

    pub async fn get_device_attr(&self) -> Result<String, ClientError> {
        self.get_text(self.cgi_url("/cgi-bin/hisnet/getdeviceattr.cgi"), &[])
            .await
    }

    pub async fn register_client(&self, ip: &str) -> Result<String, ClientError> {
        self.get_text(
            self.cgi_url("/cgi-bin/hisnet//client.cgi"),
            &[("-operation", "register"), ("-ip", ip)],
        )
        .await
    }

    pub async fn get_work_state(&self) -> Result<String, ClientError> {
        self.get_text(self.cgi_url("/cgi-bin/hisnet/getworkstate.cgi"), &[])
            .await
    }

    pub async fn work_mode_cmd(&self, cmd: &str) -> Result<String, ClientError> {
        self.get_text(
            self.cgi_url("/cgi-bin/hisnet/workmodecmd.cgi"),
            &[("-cmd", cmd)],
        )
        .await
    }

    pub async fn set_work_mode(&self, mode: &str) -> Result<String, ClientError> {
        self.get_text(
            self.cgi_url("/cgi-bin/hisnet/setworkmode.cgi"),
            &[("-workmode", mode)],
        )
        .await
    }

    pub async fn get_wifi(&self) -> Result<String, ClientError> {
        self.get_text(self.cgi_url("/cgi-bin/hisnet/getwifi.cgi"), &[])
            .await
    }

    pub async fn get_sd_status(&self) -> Result<String, ClientError> {
        self.get_text(self.cgi_url("/cgi-bin/hisnet/getsdstatus.cgi"), &[])
            .await
    }

    pub async fn get_dir_capability(&self) -> Result<Vec<String>, ClientError> {
        let text = self
            .get_text(self.cgi_url("/cgi-bin/hisnet/getdircapability.cgi"), &[])
            .await?;
        parse_capability(&text).ok_or_else(|| {
            ClientError::Protocol(format!("unparseable directory capability: {text}"))
        })
    }

    pub async fn get_dir_file_count(&self, dir: &str) -> Result<u32, ClientError> {
        let text = self
            .get_text(
                self.cgi_url("/cgi-bin/hisnet/getdirfilecount.cgi"),
                &[("-dir", dir)],
            )
            .await?;
        parse_count(&text)
            .ok_or_else(|| ClientError::Protocol(format!("unparseable file count: {text}")))
    }

    pub async fn get_dir_file_list(
        &self,
        dir: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<String>, ClientError> {
        let start_s = start.to_string();
        let end_s = end.to_string();
        let text = self
            .get_text(
                self.cgi_url("/cgi-bin/hisnet/getdirfilelist.cgi"),
                &[("-dir", dir), ("-start", &start_s), ("-end", &end_s)],
            )
            .await?;
        Ok(parse_file_list(&text))
    }

    /// Fetch an entire response body as bytes, with the fixed non-download
    /// header set (same as every CGI call). Used for thumbnails and GPS
    /// sidecars.
    pub async fn fetch_bytes(&self, device_path: &str) -> Result<Vec<u8>, ClientError> {
        let resp = self
            .http
            .get(self.cgi_url(&format!("/{device_path}")))
            .header("Accept-Encoding", "gzip")
            .header("Cookie", self.session_cookie())
            .header("User-Agent", CGI_USER_AGENT)
            .header("Connection", "keep-alive")
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn get_gps_data(&self, device_path: &str) -> Result<String, ClientError> {
        let bytes = self.fetch_bytes(device_path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn get_thumbnail(&self, thumbnail_path: &str) -> Result<Vec<u8>, ClientError> {
        self.fetch_bytes(thumbnail_path).await
    }

    /// Open a streaming byte response for a video file, with the streaming
    /// header set (`Lavf` user agent, `Icy-MetaData: 1`). Split from
    /// `fetch_bytes` so callers never face a conditional return shape.
    pub async fn open_stream(
        &self,
        device_path: &str,
        range: Option<&str>,
    ) -> Result<impl Stream<Item = reqwest::Result<bytes::Bytes>>, ClientError> {
        let mut builder = self
            .http
            .get(self.cgi_url(&format!("/{device_path}")))
            .header("User-Agent", STREAM_USER_AGENT)
            .header("Accept", "*/*")
            .header("Connection", "keep-alive")
            .header("Icy-MetaData", "1");
        if let Some(r) = range {
            builder = builder.header("Range", r);
        }
        let resp = builder.send().await?.error_for_status()?;
        Ok(resp.bytes_stream())
    }
}
