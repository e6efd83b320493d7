//! Text payloads for push, messaging and social posts.
//!
//! Every builder counts characters, not bytes, when applying platform limits.

use dealwatch_core::{EventType, Listing};

pub const REDDIT_TITLE_MAX: usize = 280;
pub const REDDIT_TITLE_KEEP: usize = 230;
pub const TWEET_BUDGET: usize = 250;
pub const TELEGRAM_CAPTION_MAX: usize = 1024;
pub const ALBUM_TITLE_CHARS: usize = 100;
pub const INSTAGRAM_CAPTION_MAX: usize = 2200;
pub const MAX_ALBUM_ITEMS: usize = 10;
pub const MAX_THREAD_LISTINGS: usize = 5;

const HASHTAGS: &str = "#Deals #Discounts #Offers";

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Truncate to `max` characters, ending in `...` when anything was cut.
pub fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    format!("{}...", truncate_chars(text, keep))
}

pub fn euros(amount: f64) -> String {
    format!("€{amount:.2}")
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn category_tag(listing: &Listing) -> String {
    let tag: String = listing.category.split_whitespace().collect();
    if tag.is_empty() {
        String::new()
    } else {
        format!(" #{tag}")
    }
}

fn headline(event: EventType) -> (&'static str, &'static str) {
    match event {
        EventType::PriceDrop => ("📉", "PRICE DROP"),
        EventType::NewDeal => ("🔥", "HOT DEAL"),
    }
}

pub fn push_title_for_deal(listing: &Listing) -> String {
    format!("🔥 {}% off!", listing.discount_percentage)
}

pub fn push_body_for_deal(listing: &Listing) -> String {
    format!(
        "{} now {}",
        ellipsize(&listing.title, 60),
        euros(listing.current_price)
    )
}

pub fn push_body_for_price_drop(listing: &Listing, old_price: f64, new_price: f64) -> String {
    format!(
        "{} from {} to {}",
        ellipsize(&listing.title, 50),
        euros(old_price),
        euros(new_price)
    )
}

pub fn push_body_for_watchlist(listing: &Listing) -> String {
    format!(
        "{} is {}% off",
        ellipsize(&listing.title, 60),
        listing.discount_percentage
    )
}

pub fn messaging_deal(listing: &Listing) -> String {
    format!(
        "🔥 *DEAL ALERT* 🔥\n\n*{title}*\n\n💰 Price: ~{original}~ → *{current}*\n📉 Discount: *{discount}%*\n⭐ Rating: {rating}/5 ({reviews} reviews)\n\n🔗 {link}",
        title = listing.title,
        original = euros(listing.original_price),
        current = euros(listing.current_price),
        discount = listing.discount_percentage,
        rating = listing.rating,
        reviews = listing.review_count,
        link = listing.affiliate_link,
    )
}

pub fn messaging_price_drop(listing: &Listing, old_price: f64, new_price: f64) -> String {
    format!(
        "📉 *PRICE DROP* 📉\n\n*{title}*\n\n💰 Before: {old}\n💰 *Now: {new}*\n💸 You save: *{saved}*\n\n🔗 {link}\n\n_An item on your watchlist just got cheaper._",
        title = listing.title,
        old = euros(old_price),
        new = euros(new_price),
        saved = euros(old_price - new_price),
        link = listing.affiliate_link,
    )
}

/// HTML caption for a single Telegram post.
pub fn telegram_caption(listing: &Listing, event: EventType) -> String {
    let (emoji, label) = headline(event);
    let mut message = format!("{emoji} <b>{label}</b> {emoji}\n\n");
    message.push_str(&format!("<b>{}</b>\n\n", escape_html(&ellipsize(&listing.title, 300))));
    message.push_str(&format!(
        "💰 Price: <s>{}</s> → <b>{}</b>\n",
        euros(listing.original_price),
        euros(listing.current_price)
    ));
    message.push_str(&format!("📉 Discount: <b>{}%</b>\n", listing.discount_percentage));
    if listing.rating > 0.0 {
        message.push_str(&format!("⭐ Rating: {}/5", listing.rating));
        if listing.review_count > 0 {
            message.push_str(&format!(" ({} reviews)", listing.review_count));
        }
        message.push('\n');
    }
    if !listing.brand.is_empty() {
        message.push_str(&format!("🏷️ Brand: {}\n", escape_html(&listing.brand)));
    }
    message.push_str(&format!(
        "\n🔗 <a href=\"{}\">Go to the deal</a>\n\n{HASHTAGS}{}",
        listing.affiliate_link,
        category_tag(listing)
    ));
    if message.chars().count() > TELEGRAM_CAPTION_MAX {
        // drop the decorated tail rather than cutting through a tag
        let mut short = format!(
            "{emoji} <b>{label}</b>\n\n<b>{}</b>\n💰 <b>{}</b> (-{}%)\n🔗 {}",
            escape_html(&ellipsize(&listing.title, 200)),
            euros(listing.current_price),
            listing.discount_percentage,
            listing.affiliate_link
        );
        if short.chars().count() > TELEGRAM_CAPTION_MAX {
            short = truncate_chars(&short, TELEGRAM_CAPTION_MAX);
        }
        return short;
    }
    message
}

pub fn telegram_album_caption(index: usize, listing: &Listing) -> String {
    format!(
        "{}. {}...\n💰 {} (-{}%)",
        index + 1,
        truncate_chars(&listing.title, ALBUM_TITLE_CHARS),
        euros(listing.current_price),
        listing.discount_percentage
    )
}

pub fn digest_intro(title: &str) -> String {
    format!("🔥 <b>{}</b> 🔥\n\nHere are the best deals we found:", escape_html(title))
}

pub fn reddit_title(listing: &Listing, event: EventType) -> String {
    let prefix = match event {
        EventType::PriceDrop => "[Price Drop]",
        EventType::NewDeal => "[Deal]",
    };
    let tail = format!(
        " | -{}% | {}",
        listing.discount_percentage,
        euros(listing.current_price)
    );
    let title = format!("{prefix} {}{tail}", listing.title);
    if title.chars().count() <= REDDIT_TITLE_MAX {
        return title;
    }
    format!(
        "{prefix} {}...{tail}",
        truncate_chars(&listing.title, REDDIT_TITLE_KEEP)
    )
}

pub fn reddit_body(listing: &Listing) -> String {
    let mut body = format!("# {}\n\n## 💰 Price\n", listing.title);
    body.push_str(&format!(
        "- **Original price:** ~~{}~~\n- **Current price:** **{}**\n- **Discount:** **{}%**\n\n",
        euros(listing.original_price),
        euros(listing.current_price),
        listing.discount_percentage
    ));
    if listing.rating > 0.0 {
        body.push_str(&format!("## ⭐ Rating\n{}/5 stars", listing.rating));
        if listing.review_count > 0 {
            body.push_str(&format!(" ({} reviews)", listing.review_count));
        }
        body.push_str("\n\n");
    }
    if !listing.brand.is_empty() {
        body.push_str(&format!("**Brand:** {}\n\n", listing.brand));
    }
    if !listing.features.is_empty() {
        body.push_str("## 📋 Features\n");
        for feature in listing.features.iter().take(5) {
            body.push_str(&format!("- {feature}\n"));
        }
        body.push('\n');
    }
    body.push_str(&format!(
        "---\n\n🔗 [**Go to the deal**]({})\n\n---\n*Posted automatically by dealwatch*",
        listing.affiliate_link
    ));
    body
}

pub fn reddit_roundup_body(listings: &[Listing]) -> String {
    let mut body = String::new();
    for (i, listing) in listings.iter().enumerate() {
        body.push_str(&format!(
            "{}. [{}]({}) | -{}% | {}\n",
            i + 1,
            listing.title,
            listing.affiliate_link,
            listing.discount_percentage,
            euros(listing.current_price)
        ));
    }
    body
}

/// Plain-text message shared by the Facebook page and Instagram.
pub fn meta_message(listing: &Listing, event: EventType) -> String {
    let (emoji, label) = headline(event);
    let mut message = format!("{emoji} {label} {emoji}\n\n{}\n\n", listing.title);
    message.push_str(&format!(
        "💰 Price: {} → {}\n📉 Discount: {}%\n",
        euros(listing.original_price),
        euros(listing.current_price),
        listing.discount_percentage
    ));
    if listing.rating > 0.0 {
        message.push_str(&format!("⭐ Rating: {}/5\n", listing.rating));
    }
    message.push_str(&format!(
        "\n🔗 {}\n\n{HASHTAGS} #Shopping{}",
        listing.affiliate_link,
        category_tag(listing)
    ));
    message
}

pub fn instagram_caption(listing: &Listing, event: EventType) -> String {
    ellipsize(&meta_message(listing, event), INSTAGRAM_CAPTION_MAX)
}

pub fn meta_digest_message(listings: &[Listing], title: &str) -> String {
    let mut message = format!("🔥 {title} 🔥\n\n");
    for (i, listing) in listings.iter().enumerate() {
        message.push_str(&format!(
            "{}. {} | {} (-{}%)\n{}\n\n",
            i + 1,
            ellipsize(&listing.title, ALBUM_TITLE_CHARS),
            euros(listing.current_price),
            listing.discount_percentage,
            listing.affiliate_link
        ));
    }
    message.push_str(HASHTAGS);
    message
}

pub fn instagram_carousel_caption(title: &str) -> String {
    ellipsize(
        &format!("🔥 {title} 🔥\n\nThe best discounts of the day!\n\n{HASHTAGS}"),
        INSTAGRAM_CAPTION_MAX,
    )
}

/// Tweet text within the 250-character budget, title shortened first.
pub fn tweet(listing: &Listing, event: EventType) -> String {
    let lead = match event {
        EventType::PriceDrop => "📉 PRICE DROP! ",
        EventType::NewDeal => "🔥 DEAL! ",
    };
    let price_info = format!(
        "{} (-{}%)",
        euros(listing.current_price),
        listing.discount_percentage
    );
    let hashtags = "\n\n#Deals #Discounts";
    let available = TWEET_BUDGET
        .saturating_sub(lead.chars().count())
        .saturating_sub(price_info.chars().count())
        .saturating_sub(hashtags.chars().count())
        .saturating_sub(5);
    let title = ellipsize(&listing.title, available);
    format!("{lead}{title}\n\n💰 {price_info}{hashtags}")
}

pub fn thread_intro(title: &str) -> String {
    format!("🔥 {title} 🔥\n\nToday's best deals 👇\n\n#Deals #Discounts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dealwatch_core::ListingDraft;

    fn listing(title: &str) -> Listing {
        Listing::from_draft(
            ListingDraft {
                id: "B0FMT".into(),
                title: title.into(),
                description: String::new(),
                image_url: Some("https://img.example/b0fmt.jpg".into()),
                affiliate_link: "https://shop.example/dp/B0FMT?tag=dw-21".into(),
                brand: "Tools & Co <Pro>".into(),
                features: (1..=7).map(|i| format!("feature {i}")).collect(),
                original_price: 99.9,
                current_price: 59.9,
                category: "Home Garden".into(),
                rating: 4.4,
                review_count: 87,
            },
            Utc::now(),
        )
    }

    #[test]
    fn reddit_title_truncates_long_titles() {
        let short = listing("Cordless drill");
        assert_eq!(reddit_title(&short, EventType::NewDeal), "[Deal] Cordless drill | -40% | €59.90");

        let long = listing(&"x".repeat(400));
        let title = reddit_title(&long, EventType::PriceDrop);
        assert!(title.chars().count() <= REDDIT_TITLE_MAX);
        assert!(title.starts_with("[Price Drop] "));
        assert!(title.contains(&format!("{}...", "x".repeat(REDDIT_TITLE_KEEP))));
    }

    #[test]
    fn tweet_stays_within_budget_for_multibyte_titles() {
        let long = listing(&"è".repeat(500));
        let text = tweet(&long, EventType::NewDeal);
        assert!(text.chars().count() <= TWEET_BUDGET);
        assert!(text.contains("€59.90 (-40%)"));

        let short = tweet(&listing("Hose reel"), EventType::PriceDrop);
        assert!(short.starts_with("📉 PRICE DROP! Hose reel"));
    }

    #[test]
    fn telegram_caption_escapes_and_respects_limit() {
        let caption = telegram_caption(&listing("Saw <XL>"), EventType::NewDeal);
        assert!(caption.contains("Saw &lt;XL&gt;"));
        assert!(caption.contains("Tools &amp; Co &lt;Pro&gt;"));
        assert!(caption.ends_with("#HomeGarden"));

        let mut huge = listing("Saw");
        huge.affiliate_link = format!("https://shop.example/{}", "q".repeat(1500));
        assert!(telegram_caption(&huge, EventType::NewDeal).chars().count() <= TELEGRAM_CAPTION_MAX);
    }

    #[test]
    fn album_caption_uses_first_hundred_chars() {
        let caption = telegram_album_caption(2, &listing(&"a".repeat(150)));
        assert!(caption.starts_with(&format!("3. {}...", "a".repeat(100))));
    }

    #[test]
    fn reddit_body_lists_at_most_five_features() {
        let body = reddit_body(&listing("Lawn mower"));
        assert!(body.contains("- feature 5"));
        assert!(!body.contains("- feature 6"));
    }

    #[test]
    fn price_drop_message_reports_savings() {
        let message = messaging_price_drop(&listing("Kettle"), 70.0, 59.9);
        assert!(message.contains("You save: *€10.10*"));
    }

    #[test]
    fn instagram_caption_is_capped() {
        let caption = instagram_caption(&listing(&"z".repeat(3000)), EventType::NewDeal);
        assert_eq!(caption.chars().count(), INSTAGRAM_CAPTION_MAX);
        assert!(caption.ends_with("..."));
    }
}
