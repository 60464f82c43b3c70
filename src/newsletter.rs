//! Email body construction and the create → target → dispatch sequence.
use serde::Serialize;
use tracing::{info, warn};

use crate::convertkit::MailingList;
use crate::error::ClientError;
use crate::markdown::escape_html;
use crate::model::ContentItem;

/// Recipient tag for a post category. Unmapped categories go to everyone.
pub fn category_tag(category: &str) -> Option<&'static str> {
    match category {
        "AI & Tech" => Some("tech"),
        "Investment & Market" => Some("investment"),
        "Life & Beyond" => Some("lifestyle"),
        _ => None,
    }
}

/// Values the email template needs beyond the post itself.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub site_url: String,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResult {
    pub broadcast_id: u64,
    pub tag: Option<String>,
}

pub fn post_url(settings: &EmailSettings, item: &ContentItem) -> String {
    format!("{}/blog/{}", settings.site_url.trim_end_matches('/'), item.slug)
}

/// Full HTML email for a post. `body_html` is inserted as-is.
pub fn render_email(item: &ContentItem, body_html: &str, settings: &EmailSettings) -> String {
    let title = escape_html(&item.title);
    let date = item.date.format("%B %-d, %Y");
    let byline = settings
        .author
        .as_deref()
        .map(|a| format!(" by {}", escape_html(a)))
        .unwrap_or_default();
    format!(
        r#"<html>
  <head>
    <title>{title}</title>
  </head>
  <body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="text-align: center; margin-bottom: 30px;">
      <h1 style="color: #333;">{title}</h1>
      <p style="color: #666;">Published on {date}{byline}</p>
      <p style="color: #666;">Category: {category}</p>
    </div>

    <div style="margin-bottom: 30px; padding: 15px; background-color: #f7f7f7; border-left: 4px solid #333;">
      <p style="font-style: italic; color: #555;">{excerpt}</p>
    </div>

    <div style="line-height: 1.6; color: #333;">
      {body_html}
    </div>

    <div style="margin-top: 30px; padding-top: 20px; border-top: 1px solid #eee; text-align: center;">
      <p>
        <a href="{url}" style="display: inline-block; padding: 10px 20px; background-color: #333; color: white; text-decoration: none; border-radius: 4px;">
          Read the full article on my website
        </a>
      </p>
    </div>

    <div style="margin-top: 30px; font-size: 12px; color: #999; text-align: center;">
      <p>You're receiving this email because you subscribed to my newsletter.</p>
      <p>
        <a href="{{{{ unsubscribe_url }}}}" style="color: #999;">Unsubscribe</a>
      </p>
    </div>
  </body>
</html>
"#,
        category = escape_html(&item.category),
        excerpt = escape_html(&item.description),
        url = escape_html(&post_url(settings, item)),
    )
}

/// Narrow the broadcast to the category's tag. Misses and failures leave the
/// broadcast untargeted.
pub async fn apply_category_targeting(
    list: &dyn MailingList,
    broadcast_id: u64,
    category: &str,
) -> Option<String> {
    let tag_name = category_tag(category)?;
    let tag = match list.find_tag(tag_name).await {
        Ok(Some(tag)) => tag,
        Ok(None) => {
            warn!(broadcast_id, tag = tag_name, "tag not found; sending untargeted");
            return None;
        }
        Err(err) => {
            warn!(broadcast_id, tag = tag_name, %err, "failed to look up tag; sending untargeted");
            return None;
        }
    };
    match list.set_recipients(broadcast_id, &[tag.id]).await {
        Ok(()) => Some(tag.name),
        Err(err) => {
            warn!(broadcast_id, tag = tag_name, %err, "failed to apply category targeting");
            None
        }
    }
}

/// Create the broadcast draft for a post.
pub async fn create_broadcast(
    list: &dyn MailingList,
    item: &ContentItem,
    email_html: &str,
) -> Result<u64, ClientError> {
    let description = format!("Auto-generated newsletter for: {}", item.title);
    let broadcast_id = list
        .create_broadcast(&item.title, email_html, &description)
        .await?;
    info!(broadcast_id, page_id = %item.id, "broadcast created");
    Ok(broadcast_id)
}

/// Apply category targeting to an existing broadcast and send it.
pub async fn dispatch_broadcast(
    list: &dyn MailingList,
    item: &ContentItem,
    broadcast_id: u64,
) -> Result<BroadcastResult, ClientError> {
    let tag = apply_category_targeting(list, broadcast_id, &item.category).await;
    list.send_broadcast(broadcast_id).await?;
    info!(broadcast_id, page_id = %item.id, ?tag, "broadcast sent");
    Ok(BroadcastResult { broadcast_id, tag })
}

/// Create the broadcast, apply targeting, then send it immediately.
pub async fn send_newsletter(
    list: &dyn MailingList,
    item: &ContentItem,
    email_html: &str,
) -> Result<BroadcastResult, ClientError> {
    let broadcast_id = create_broadcast(list, item, email_html).await?;
    dispatch_broadcast(list, item, broadcast_id).await
}
