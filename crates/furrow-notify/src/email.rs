use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::{DeliveryError, NewMessageNotice};

/// Characters of message content shown in a preview.
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: EmailMessage) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            .port(settings.port);

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from: settings.from.parse()?,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, email: EmailMessage) -> Result<(), DeliveryError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject)
            .multipart(MultiPart::alternative_plain_html(
                email.text_body,
                email.html_body,
            ))?;

        self.mailer.send(message).await?;
        Ok(())
    }
}

/// Used when SMTP is not configured.
pub struct DisabledEmail;

#[async_trait]
impl EmailTransport for DisabledEmail {
    async fn send(&self, email: EmailMessage) -> Result<(), DeliveryError> {
        debug!("Email disabled, dropping \"{}\" to {}", email.subject, email.to);
        Ok(())
    }
}

/// Shorten `content` to [`PREVIEW_CHARS`] characters, marking the cut with `...`.
pub fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Link back into the conversation with the sender, scoped to the listing
/// when there is one.
pub fn deep_link(app_url: &str, notice: &NewMessageNotice) -> String {
    let base = format!("{}/messages", app_url.trim_end_matches('/'));
    match reqwest::Url::parse(&base) {
        Ok(mut url) => {
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("user", &notice.sender_id);
                if let Some(listing_id) = &notice.listing_id {
                    query.append_pair("listing", listing_id);
                }
            }
            url.to_string()
        }
        Err(_) => base,
    }
}

pub fn render_new_message(to: &str, app_url: &str, notice: &NewMessageNotice) -> EmailMessage {
    let snippet = preview(&notice.content);
    let link = deep_link(app_url, notice);

    let text_body = format!(
        "{} sent you a message:\n\n{}\n\nReply here: {}\n",
        notice.sender_name, snippet, link
    );

    let html_body = format!(
        "<p><strong>{}</strong> sent you a message:</p>\
         <blockquote>{}</blockquote>\
         <p><a href=\"{}\">View conversation</a></p>",
        escape_html(&notice.sender_name),
        escape_html(&snippet),
        escape_html(&link),
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("New message from {}", notice.sender_name),
        text_body,
        html_body,
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
