use crate::config::Settings;
use crate::mirror::MirrorSink;
use anyhow::Context;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;

const NEW_TAB_ROWS: u32 = 2000;
const NEW_TAB_COLS: u32 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Appends batches to one tab of a Google spreadsheet as a service account.
#[derive(Debug)]
pub struct GoogleSheetsMirror {
    http: reqwest::Client,
    base_url: String,
    key: ServiceAccountKey,
    sheet_id: String,
    tab: String,
}

impl GoogleSheetsMirror {
    /// `Ok(None)` when the mirror is not configured.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if !settings.mirror_configured() {
            return Ok(None);
        }

        let key: ServiceAccountKey =
            serde_json::from_str(settings.require_google_service_account_json()?)
                .context("GOOGLE_SERVICE_ACCOUNT_JSON is not a service account key")?;

        let base_url =
            std::env::var("SHEETS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs = std::env::var("SHEETS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build sheets http client")?;

        Ok(Some(Self {
            http,
            base_url,
            key,
            sheet_id: settings.require_sheet_id()?.to_string(),
            tab: settings.sheet_tab.clone(),
        }))
    }

    fn token_uri(&self) -> &str {
        self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let assertion = build_jwt(&self.key, self.token_uri(), chrono::Utc::now().timestamp())?;

        let res = self
            .http
            .post(self.token_uri())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("service account token request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read token response")?;
        if !status.is_success() {
            anyhow::bail!("token HTTP {status}: {text}");
        }

        let token: TokenResponse =
            serde_json::from_str(&text).context("failed to parse token response")?;
        Ok(token.access_token)
    }

    fn url(&self, segments: &[&str]) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(self.base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid SHEETS_BASE_URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("SHEETS_BASE_URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> anyhow::Result<Value> {
        let res = req
            .send()
            .await
            .with_context(|| format!("sheets {what} request failed"))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read sheets {what} response"))?;
        if !status.is_success() {
            anyhow::bail!("sheets {what} HTTP {status}: {text}");
        }
        serde_json::from_str(&text)
            .with_context(|| format!("sheets {what} response is not valid JSON: {text}"))
    }

    async fn ensure_tab(&self, headers: &HeaderMap) -> anyhow::Result<()> {
        let url = self.url(&[self.sheet_id.as_str()])?;
        let meta = self
            .send(
                self.http
                    .get(url)
                    .headers(headers.clone())
                    .query(&[("fields", "sheets.properties.title")]),
                "metadata",
            )
            .await?;

        if tab_titles(&meta).iter().any(|t| t == &self.tab) {
            return Ok(());
        }

        tracing::info!(tab = %self.tab, "creating missing sheet tab");
        let batch_update = format!("{}:batchUpdate", self.sheet_id);
        let url = self.url(&[batch_update.as_str()])?;
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": self.tab,
                        "gridProperties": {"rowCount": NEW_TAB_ROWS, "columnCount": NEW_TAB_COLS}
                    }
                }
            }]
        });
        self.send(
            self.http.post(url).headers(headers.clone()).json(&body),
            "addSheet",
        )
        .await?;
        Ok(())
    }

    async fn tab_is_empty(&self, headers: &HeaderMap) -> anyhow::Result<bool> {
        let range = a1_tab(&self.tab);
        let url = self.url(&[self.sheet_id.as_str(), "values", range.as_str()])?;
        let values = self
            .send(self.http.get(url).headers(headers.clone()), "values")
            .await?;
        Ok(values
            .get("values")
            .and_then(Value::as_array)
            .map_or(true, |rows| rows.is_empty()))
    }
}

#[async_trait::async_trait]
impl MirrorSink for GoogleSheetsMirror {
    fn sink_name(&self) -> &'static str {
        "google_sheets"
    }

    async fn append_rows(&self, columns: &[String], rows: &[Vec<String>]) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );

        self.ensure_tab(&headers).await?;

        let mut values: Vec<&[String]> = Vec::with_capacity(rows.len() + 1);
        if self.tab_is_empty(&headers).await? {
            values.push(columns);
        }
        values.extend(rows.iter().map(Vec::as_slice));

        let append = format!("{}:append", a1_tab(&self.tab));
        let url = self.url(&[self.sheet_id.as_str(), "values", append.as_str()])?;
        self.send(
            self.http
                .post(url)
                .headers(headers)
                .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
                .json(&json!({ "values": values })),
            "append",
        )
        .await?;

        Ok(())
    }
}

/// A1 range covering a whole tab; quotes are doubled inside the quoted name.
fn a1_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

fn tab_titles(meta: &Value) -> Vec<String> {
    meta.get("sheets")
        .and_then(Value::as_array)
        .map(|sheets| {
            sheets
                .iter()
                .filter_map(|s| s.pointer("/properties/title").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn base64url(bytes: &[u8]) -> String {
    openssl::base64::encode_block(bytes)
        .trim_end_matches('=')
        .replace('+', "-")
        .replace('/', "_")
}

/// RS256-signed assertion for the OAuth JWT bearer grant.
pub fn build_jwt(key: &ServiceAccountKey, audience: &str, now: i64) -> anyhow::Result<String> {
    let header = json!({"alg": "RS256", "typ": "JWT"});
    let claims = JwtClaims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: audience,
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
    };

    let signing_input = format!(
        "{}.{}",
        base64url(serde_json::to_string(&header)?.as_bytes()),
        base64url(serde_json::to_string(&claims)?.as_bytes())
    );

    let pkey = PKey::private_key_from_pem(key.private_key.as_bytes())
        .context("service account private_key is not a PEM key")?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.update(signing_input.as_bytes())?;
    let signature = signer.sign_to_vec()?;

    Ok(format!("{signing_input}.{}", base64url(&signature)))
}
