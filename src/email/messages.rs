//! Outgoing message construction
//!
//! Minimal HTML bodies for the three notification variants. Full template
//! rendering lives with the email collaborator; these builders only carry
//! the semantics the fulfillment pipeline owns: what is attached, which
//! link is embedded, and which variant a gift routes through.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::db::schemas::{GiftContent, GiftDoc};
use crate::email::{EmailAttachment, EmailMessage};

/// Build the generic gift-delivery email for a non-knot gift
pub fn gift_email(gift: &GiftDoc, to: &str) -> EmailMessage {
    let mut attachments = Vec::new();
    let mut body = format!(
        "<p>Hello {},</p><p>{} sent you a personalized gift.</p>",
        html_escape(&gift.recipient_name),
        html_escape(&gift.sender_name),
    );

    match &gift.generated_content {
        Some(GiftContent::Text { body: letter }) => {
            body.push_str(&format!("<blockquote>{}</blockquote>", html_escape(letter)));
        }
        Some(GiftContent::AudioRef { url, base64 }) => {
            if let Some(b64) = base64 {
                if let Ok(bytes) = STANDARD.decode(b64) {
                    attachments.push(EmailAttachment {
                        filename: "gift-audio.mp3".to_string(),
                        content: bytes,
                        content_type: "audio/mpeg".to_string(),
                        content_id: None,
                    });
                    body.push_str("<p>Your audio gift is attached.</p>");
                }
            } else if let Some(url) = url {
                body.push_str(&format!(
                    "<p><a href=\"{}\">Listen to your gift</a></p>",
                    html_escape(url)
                ));
            }
        }
        Some(GiftContent::ImageCandidates { candidates, selected_id }) => {
            // Delivery happens after selection resolution; embed inline
            let selected = selected_id
                .as_ref()
                .and_then(|id| candidates.iter().find(|c| &c.id == id))
                .or_else(|| candidates.first());
            if let Some(candidate) = selected {
                body.push_str(&format!(
                    "<p><img src=\"{}\" alt=\"Your gift\" /></p>",
                    html_escape(&candidate.url)
                ));
            }
        }
        Some(GiftContent::VideoRef { url }) => {
            body.push_str(&format!(
                "<p><a href=\"{}\">Watch your gift</a></p>",
                html_escape(url)
            ));
        }
        Some(GiftContent::SealedKnot { .. }) | None => {}
    }

    EmailMessage {
        to: to.to_string(),
        subject: format!("A gift from {}", gift.sender_name),
        html_body: body,
        attachments,
    }
}

/// Build the sealed-knot delivery email: a link only, never the message
pub fn knot_email(gift: &GiftDoc, to: &str, knot_url: &str) -> EmailMessage {
    let body = format!(
        "<p>Hello {},</p>\
         <p>{} tied a knot for you. It stays sealed until you untie it.</p>\
         <p><a href=\"{}\">Untie your knot</a></p>",
        html_escape(&gift.recipient_name),
        html_escape(&gift.sender_name),
        html_escape(knot_url),
    );

    EmailMessage {
        to: to.to_string(),
        subject: format!("{} tied a knot for you", gift.sender_name),
        html_body: body,
        attachments: Vec::new(),
    }
}

/// Build the buyer-facing payment confirmation
pub fn confirmation_email(gift: &GiftDoc, buyer_email: &str, amount_cents: i64, currency: &str) -> EmailMessage {
    let body = format!(
        "<p>Thank you! Your payment of {}.{:02} {} was received.</p>\
         <p>Your gift for {} is on its way.</p>",
        amount_cents / 100,
        amount_cents % 100,
        html_escape(currency),
        html_escape(&gift.recipient_name),
    );

    EmailMessage {
        to: buyer_email.to_string(),
        subject: "Your Keepsake order is confirmed".to_string(),
        html_body: body,
        attachments: Vec::new(),
    }
}

/// Escape text interpolated into HTML bodies
fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::GiftKind;

    #[test]
    fn test_knot_email_never_contains_message() {
        let gift = GiftDoc::new(GiftKind::SealedKnot, "Ada".into(), "Grace".into());
        let email = knot_email(&gift, "grace@example.com", "https://keepsake.example/knot/tok");
        assert!(email.html_body.contains("https://keepsake.example/knot/tok"));
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn test_gift_email_escapes_html() {
        let mut gift = GiftDoc::new(GiftKind::TextLetter, "<script>".into(), "Grace".into());
        gift.generated_content = Some(GiftContent::Text {
            body: "a & b".to_string(),
        });
        let email = gift_email(&gift, "grace@example.com");
        assert!(email.html_body.contains("&lt;script&gt;"));
        assert!(email.html_body.contains("a &amp; b"));
    }
}
