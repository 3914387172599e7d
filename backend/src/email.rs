use std::env;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const TOKEN_URL_ENV: &str = "GOOGLE_TOKEN_URL";
const GMAIL_API_URL_ENV: &str = "GMAIL_API_URL";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_GMAIL_API_URL: &str = "https://gmail.googleapis.com/gmail/v1";
const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
const CONSENT_URL: &str = "https://accounts.google.com/o/oauth2/auth";

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("missing {0}")]
    MissingEnv(&'static str),
    #[error("invalid EVENT_DATE {0:?}: expected YYYY-MM-DD")]
    InvalidEventDate(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token exchange failed: {0}")]
    Token(String),
    #[error("gmail send failed: {0}")]
    Gmail(String),
    #[error("invalid url: {0}")]
    BadUrl(String),
}

/// OAuth client identity, shared by the bootstrap flow and the sender.
#[derive(Debug, Clone)]
pub struct GoogleOauth {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

impl GoogleOauth {
    pub fn from_env() -> Result<Self, EmailError> {
        Ok(Self {
            client_id: require_env("GMAIL_CLIENT_ID")?,
            client_secret: require_env("GMAIL_CLIENT_SECRET")?,
            redirect_url: require_env("GMAIL_REDIRECT_URL")?,
        })
    }
}

/// Calendar invite details carried in the text/calendar part.
#[derive(Debug, Clone)]
pub struct EventDetails {
    pub title: String,
    pub description: String,
    /// YYYY-MM-DD; the invite is an all-day event.
    pub date: String,
    pub time_zone: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub oauth: GoogleOauth,
    pub refresh_token: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub date: String,
    pub gif_url: String,
    pub event: EventDetails,
}

impl EmailConfig {
    /// Read the full sending configuration. Missing credentials are an
    /// error here, not at startup, so the static site still serves
    /// without Gmail secrets.
    pub fn from_env() -> Result<Self, EmailError> {
        let recipients = split_recipients(&env::var("EMAIL_RECIPIENTS").unwrap_or_default());
        if recipients.is_empty() {
            return Err(EmailError::MissingEnv("EMAIL_RECIPIENTS"));
        }

        let date = env_or_default("EMAIL_DATE", "March 14, 2026");
        let subject = env_or_default("EMAIL_SUBJECT", "Valentine Date");

        Ok(Self {
            oauth: GoogleOauth::from_env()?,
            refresh_token: require_env("GMAIL_REFRESH_TOKEN")?,
            sender: require_env("GMAIL_SENDER")?,
            recipients,
            event: EventDetails {
                title: env_or_default("EVENT_TITLE", &subject),
                description: env_or_default("EVENT_DESCRIPTION", "See you there!"),
                date: env_or_default("EVENT_DATE", "2026-03-14"),
                time_zone: env_or_default("EVENT_TIME_ZONE", "UTC"),
            },
            subject,
            date,
            gif_url: env_or_default(
                "EMAIL_GIF_URL",
                "https://media.giphy.com/media/3oEjI4sFlp73fvEYgw/giphy.gif",
            ),
        })
    }
}

fn require_env(key: &'static str) -> Result<String, EmailError> {
    let value = env::var(key).unwrap_or_default().trim().to_string();
    if value.is_empty() {
        return Err(EmailError::MissingEnv(key));
    }
    Ok(value)
}

fn env_or_default(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn split_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Escape text for ICS property values.
fn ics_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

/// All-day METHOD:REQUEST invite. Deterministic given `now` and `uid`.
fn build_ics(event: &EventDetails, now: DateTime<Utc>, uid: &str) -> Result<String, EmailError> {
    let start = NaiveDate::parse_from_str(&event.date, "%Y-%m-%d")
        .map_err(|_| EmailError::InvalidEventDate(event.date.clone()))?;
    let end = start + Duration::days(1);

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//valentine//ask-page//EN".to_string(),
        "METHOD:REQUEST".to_string(),
        format!("X-WR-TIMEZONE:{}", event.time_zone),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTAMP:{}", now.format("%Y%m%dT%H%M%SZ")),
        format!("DTSTART;VALUE=DATE:{}", start.format("%Y%m%d")),
        format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d")),
        format!("SUMMARY:{}", ics_escape(&event.title)),
        format!("DESCRIPTION:{}", ics_escape(&event.description)),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];
    Ok(lines.join("\r\n"))
}

/// RFC 2822 multipart/mixed message: plain-text invitation plus the
/// calendar invite. Deterministic given `now` and `uid` so tests can
/// pin the output.
pub fn build_message(
    cfg: &EmailConfig,
    now: DateTime<Utc>,
    uid: &str,
) -> Result<String, EmailError> {
    let boundary = format!("valentine-{uid}");
    let ics = build_ics(&cfg.event, now, uid)?;

    let body = [
        "We are officially booked for our valentine date!".to_string(),
        format!("Date: {}", cfg.date),
        String::new(),
        "Cute gif:".to_string(),
        cfg.gif_url.clone(),
    ]
    .join("\n");

    let message = [
        format!("From: {}", cfg.sender),
        format!("To: {}", cfg.recipients.join(", ")),
        format!("Subject: {}", cfg.subject),
        "MIME-Version: 1.0".to_string(),
        format!("Content-Type: multipart/mixed; boundary=\"{boundary}\""),
        String::new(),
        format!("--{boundary}"),
        "Content-Type: text/plain; charset=\"UTF-8\"".to_string(),
        String::new(),
        body,
        format!("--{boundary}"),
        "Content-Type: text/calendar; method=REQUEST; charset=\"UTF-8\"".to_string(),
        "Content-Disposition: attachment; filename=\"invite.ics\"".to_string(),
        String::new(),
        ics,
        format!("--{boundary}--"),
    ]
    .join("\r\n");

    Ok(message)
}

fn token_url() -> String {
    env_or_default(TOKEN_URL_ENV, DEFAULT_TOKEN_URL)
}

fn gmail_api_url() -> String {
    env_or_default(GMAIL_API_URL_ENV, DEFAULT_GMAIL_API_URL)
}

/// Consent-screen URL for the one-time refresh-token bootstrap.
pub fn consent_url(oauth: &GoogleOauth) -> Result<String, EmailError> {
    let url = Url::parse_with_params(
        CONSENT_URL,
        &[
            ("client_id", oauth.client_id.as_str()),
            ("redirect_uri", oauth.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", GMAIL_SEND_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", "valentine"),
        ],
    )
    .map_err(|e| EmailError::BadUrl(e.to_string()))?;
    Ok(url.into())
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Swap an authorization code for tokens (bootstrap flow).
pub async fn exchange_code(
    client: &reqwest::Client,
    oauth: &GoogleOauth,
    code: &str,
) -> Result<TokenResponse, EmailError> {
    let resp = client
        .post(token_url())
        .form(&[
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("redirect_uri", oauth.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(EmailError::Token(resp.text().await.unwrap_or_default()));
    }
    Ok(resp.json::<TokenResponse>().await?)
}

async fn access_token(client: &reqwest::Client, cfg: &EmailConfig) -> Result<String, EmailError> {
    let resp = client
        .post(token_url())
        .form(&[
            ("client_id", cfg.oauth.client_id.as_str()),
            ("client_secret", cfg.oauth.client_secret.as_str()),
            ("refresh_token", cfg.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(EmailError::Token(resp.text().await.unwrap_or_default()));
    }
    let token: TokenResponse = resp.json().await?;
    token
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EmailError::Token("no access_token in response".to_string()))
}

/// Build and send the invitation through the Gmail REST API. One
/// attempt; the caller surfaces failures to the client.
pub async fn send(client: &reqwest::Client, cfg: &EmailConfig) -> Result<(), EmailError> {
    let token = access_token(client, cfg).await?;

    let now = Utc::now();
    let uid = format!("{}@valentine", now.timestamp_millis());
    let message = build_message(cfg, now, &uid)?;
    let raw = URL_SAFE_NO_PAD.encode(message);

    let url = format!(
        "{}/users/me/messages/send",
        gmail_api_url().trim_end_matches('/')
    );
    let resp = client
        .post(&url)
        .bearer_auth(token)
        .json(&json!({ "raw": raw }))
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(EmailError::Gmail(format!("{status}: {text}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_config() -> EmailConfig {
        EmailConfig {
            oauth: GoogleOauth {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                redirect_url: "http://localhost:8080/oauth/callback".to_string(),
            },
            refresh_token: "refresh".to_string(),
            sender: "sender@example.com".to_string(),
            recipients: vec!["recipient@example.com".to_string()],
            subject: "Valentine Date".to_string(),
            date: "March 14, 2026".to_string(),
            gif_url: "https://example.com/gif".to_string(),
            event: EventDetails {
                title: "Valentine Date".to_string(),
                description: "Can't wait".to_string(),
                date: "2026-03-14".to_string(),
                time_zone: "Asia/Kuala_Lumpur".to_string(),
            },
        }
    }

    #[test]
    fn message_carries_calendar_invite_and_gif() {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let msg = build_message(&test_config(), now, "test-uid").expect("build");

        assert!(msg.contains("Content-Type: multipart/mixed"));
        assert!(msg.contains("Content-Type: text/calendar; method=REQUEST"));
        assert!(msg.contains("DTSTART;VALUE=DATE:20260314"));
        assert!(msg.contains("DTEND;VALUE=DATE:20260315"));
        assert!(msg.contains("DTSTAMP:20260215T000000Z"));
        assert!(msg.contains("UID:test-uid"));
        assert!(msg.contains("https://example.com/gif"));
        assert!(msg.contains("To: recipient@example.com"));
    }

    #[test]
    fn message_rejects_malformed_event_date() {
        let mut cfg = test_config();
        cfg.event.date = "14/03/2026".to_string();
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        assert!(matches!(
            build_message(&cfg, now, "uid"),
            Err(EmailError::InvalidEventDate(_))
        ));
    }

    #[test]
    fn ics_escapes_special_characters() {
        let mut cfg = test_config();
        cfg.event.title = "Dinner; wine, maybe\nmore".to_string();
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let msg = build_message(&cfg, now, "uid").expect("build");
        assert!(msg.contains("SUMMARY:Dinner\\; wine\\, maybe\\nmore"));
    }

    #[test]
    fn recipient_splitting_trims_and_drops_blanks() {
        let recipients = split_recipients(" a@example.com , ,b@example.com,");
        assert_eq!(recipients, vec!["a@example.com", "b@example.com"]);
        assert!(split_recipients("").is_empty());
    }

    #[test]
    fn consent_url_carries_offline_access() {
        let url = consent_url(&test_config().oauth).expect("url");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("gmail.send"));
    }
}
