//! Minimal STS `AssumeRole` client, signed with AWS Signature Version 4.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::{macros::format_description, OffsetDateTime};

use super::StorageError;

type HmacSha256 = Hmac<Sha256>;

const STS_VERSION: &str = "2011-06-15";
const SESSION_DURATION_SECS: u32 = 3600;
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<String>,
}

impl std::fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &"***")
            .field("expiration", &self.expiration)
            .finish()
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// `Authorization` header value for a form POST to `/` on `host`.
fn authorization(
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
    host: &str,
    body: &str,
    now: OffsetDateTime,
) -> Result<(String, String), StorageError> {
    let amz_date = now
        .format(format_description!("[year][month][day]T[hour][minute][second]Z"))
        .map_err(|e| StorageError::Credentials(e.to_string()))?;
    let date = &amz_date[..8];

    let signed_headers = "content-type;host;x-amz-date";
    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{FORM_CONTENT_TYPE}\nhost:{host}\nx-amz-date:{amz_date}\n\n{signed_headers}\n{}",
        sha256_hex(body.as_bytes())
    );

    let scope = format!("{date}/{region}/sts/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{secret_access_key}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"sts");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let header = format!(
        "AWS4-HMAC-SHA256 Credential={access_key_id}/{scope}, SignedHeaders={signed_headers}, Signature={signature}"
    );
    Ok((header, amz_date))
}

fn extract_tag<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim())
}

fn parse_assume_role_response(xml: &str) -> Result<TemporaryCredentials, StorageError> {
    let field = |tag: &str| {
        extract_tag(xml, tag)
            .map(str::to_string)
            .ok_or_else(|| StorageError::Credentials(format!("AssumeRole response missing <{tag}>")))
    };

    Ok(TemporaryCredentials {
        access_key_id: field("AccessKeyId")?,
        secret_access_key: field("SecretAccessKey")?,
        session_token: field("SessionToken")?,
        expiration: extract_tag(xml, "Expiration").map(str::to_string),
    })
}

pub struct StsClient {
    http: reqwest::Client,
}

impl Default for StsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StsClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn assume_role(
        &self,
        access_key_id: &str,
        secret_access_key: &str,
        role_arn: &str,
        region: &str,
        session_name: &str,
    ) -> Result<TemporaryCredentials, StorageError> {
        let host = format!("sts.{region}.amazonaws.com");
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", "AssumeRole")
            .append_pair("DurationSeconds", &SESSION_DURATION_SECS.to_string())
            .append_pair("RoleArn", role_arn)
            .append_pair("RoleSessionName", session_name)
            .append_pair("Version", STS_VERSION)
            .finish();

        let (auth, amz_date) = authorization(
            access_key_id,
            secret_access_key,
            region,
            &host,
            &body,
            OffsetDateTime::now_utc(),
        )?;

        let resp = self
            .http
            .post(format!("https://{host}/"))
            .header("content-type", FORM_CONTENT_TYPE)
            .header("x-amz-date", amz_date)
            .header("authorization", auth)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Credentials(format!("AssumeRole request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| StorageError::Credentials(format!("AssumeRole response unreadable: {e}")))?;
        if !status.is_success() {
            let reason = extract_tag(&text, "Message").unwrap_or(text.as_str());
            return Err(StorageError::Credentials(format!("AssumeRole returned {status}: {reason}")));
        }

        parse_assume_role_response(&text)
    }
}
