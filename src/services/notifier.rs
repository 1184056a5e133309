use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::{prelude::*, types::ParseMode};
use thiserror::Error;

use crate::{
    db::models::DrugWithForm,
    utils::{days_until, escape_markdown, format_date},
};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// Delivers one user's batch of expiring drugs.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(
        &self,
        owner_user_id: i32,
        drugs: &[DrugWithForm],
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError>;
}

/// Posts alerts to a single Telegram chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl AlertNotifier for TelegramNotifier {
    async fn notify(
        &self,
        owner_user_id: i32,
        drugs: &[DrugWithForm],
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        for message in format_alert_messages(owner_user_id, drugs, now) {
            self.bot
                .send_message(self.chat_id, message)
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }

        Ok(())
    }
}

/// Writes alerts to the log. Used when no bot is configured.
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(
        &self,
        owner_user_id: i32,
        drugs: &[DrugWithForm],
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        for item in drugs {
            log::warn!(
                "Expiry alert for user {}: {} ({}) expires {} ({} days)",
                owner_user_id,
                item.drug.drug_name,
                item.form.name,
                format_date(item.drug.expiration_date),
                days_until(item.drug.expiration_date, now)
            );
        }
        Ok(())
    }
}

/// Longest message sent in one request. Telegram rejects anything over
/// 4096 characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Drug and form names are cut to this many characters before escaping.
const MAX_NAME_CHARS: usize = 200;

const ALERT_FOOTER: &str = "Please check the first aid kit\\.";

/// Renders the MarkdownV2 alert messages for one owner's batch.
///
/// The drugs are listed in the order given and split across as many
/// messages as needed to keep each one within [`MAX_MESSAGE_CHARS`]. Every
/// message carries the alert header and the closing line.
///
/// Parameters:
/// - `owner_user_id`: The user the drugs belong to.
/// - `drugs`: The expiring drugs, with their forms.
/// - `now`: Reference time for the "days until expiry" figure.
///
/// Returns at least one message, even for an empty batch.
pub fn format_alert_messages(
    owner_user_id: i32,
    drugs: &[DrugWithForm],
    now: DateTime<Utc>,
) -> Vec<String> {
    let header = format!("⚠️ *Drug Expiry Alert*\n\n*User:* `{}`", owner_user_id);
    // Two blank-line separators around the body.
    let budget = MAX_MESSAGE_CHARS - header.chars().count() - ALERT_FOOTER.chars().count() - 4;

    let mut bodies = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    for item in drugs {
        let entry = format_drug_entry(item, now);
        let entry_chars = entry.chars().count() + 2;

        if !current.is_empty() && current_chars + entry_chars > budget {
            bodies.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&entry);
        current_chars += entry_chars;
    }
    if !current.is_empty() || bodies.is_empty() {
        bodies.push(current);
    }

    bodies
        .into_iter()
        .map(|body| format!("{}\n\n{}\n\n{}", header, body, ALERT_FOOTER))
        .collect()
}

fn format_drug_entry(item: &DrugWithForm, now: DateTime<Utc>) -> String {
    format!(
        "*Name:* `{}`\n*Form:* `{}`\n*Expiry Date:* `{}`\n*Days until expiry:* `{}`",
        escape_markdown(&truncate_chars(&item.drug.drug_name, MAX_NAME_CHARS)),
        escape_markdown(&truncate_chars(&item.form.name, MAX_NAME_CHARS)),
        format_date(item.drug.expiration_date),
        days_until(item.drug.expiration_date, now),
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
