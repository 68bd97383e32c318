//! Main menu flow — the default conversational surface.
//!
//! Any message that no workflow claims lands here. The menu is an
//! interactive list; selections either arm an intent for the next free-text
//! message (post/offer briefs) or answer immediately (stats, review link,
//! help).

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::config::MENU_BODY_MAX;
use crate::engine::Deps;
use crate::error::Result;
use crate::services::transport::{ListRow, ListSection};
use crate::store::model::{ActivityKind, ActivityRecord, ActivityStatus, Client, IntentKind};

pub const MENU_POST: &str = "menu_post";
pub const MENU_OFFER: &str = "menu_offer";
pub const MENU_STATS: &str = "menu_stats";
pub const MENU_REVIEW_LINK: &str = "menu_review_link";
pub const MENU_HELP: &str = "menu_help";

const HELP_TEXT: &str = "Here's what I can do:\n\n\
- Create Google posts from a quick description\n\
- Run limited-time offers\n\
- Alert you to new reviews and draft replies\n\
- Post project photos to Google and your website\n\
- Send you a weekly performance digest\n\n\
Pick an option from the menu to get started.";

/// The menu flow.
pub struct MenuFlow {
    deps: Deps,
}

impl MenuFlow {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Send the main menu.
    pub async fn send_main_menu(&self, client: &Client) -> Result<()> {
        let body = format!(
            "Hi! I'm your LocalEngine assistant for {}. What would you like to do?",
            client.business_name
        );
        self.deps
            .chat
            .send_list(&client.address, &body, "Menu", &menu_sections())
            .await?;
        Ok(())
    }

    /// Send a confirmation and re-offer the menu.
    ///
    /// Short confirmations ride in the list body; anything that would push
    /// the body past the transport limit goes out as a separate text first.
    pub async fn confirmation_with_menu(&self, client: &Client, confirmation: &str) -> Result<()> {
        let body = format!("{confirmation}\n\nWhat would you like to do next?");
        if body.chars().count() <= MENU_BODY_MAX {
            self.deps
                .chat
                .send_list(&client.address, &body, "Menu", &menu_sections())
                .await?;
        } else {
            self.deps.chat.send_text(&client.address, confirmation).await?;
            self.send_main_menu(client).await?;
        }
        Ok(())
    }

    /// Handle a menu list selection.
    pub async fn handle_selection(&self, client: &Client, selection: &str) -> Result<()> {
        match selection {
            MENU_POST => {
                self.deps
                    .db
                    .arm_intent(client.id, IntentKind::PostBrief)
                    .await?;
                self.deps
                    .chat
                    .send_text(&client.address, &post_brief_prompt(client))
                    .await?;
            }
            MENU_OFFER => {
                self.deps
                    .db
                    .arm_intent(client.id, IntentKind::OfferBrief)
                    .await?;
                self.deps
                    .chat
                    .send_text(&client.address, &offer_brief_prompt(client))
                    .await?;
            }
            MENU_STATS => self.send_stats(client).await?,
            MENU_REVIEW_LINK => self.send_review_link(client).await?,
            MENU_HELP => self.confirmation_with_menu(client, HELP_TEXT).await?,
            other => {
                warn!(client_id = client.id, selection = other, "Unknown menu selection");
                self.send_main_menu(client).await?;
            }
        }
        Ok(())
    }

    async fn send_stats(&self, client: &Client) -> Result<()> {
        let now = Utc::now();
        let metrics = match self
            .deps
            .listing
            .fetch_metrics(client, now - Duration::days(7), now)
            .await
        {
            Ok(metrics) => metrics,
            Err(e) => {
                info!(client_id = client.id, "Stats fetch failed: {e}");
                self.confirmation_with_menu(
                    client,
                    "Sorry, I couldn't fetch your stats right now. Try again later.",
                )
                .await?;
                return Ok(());
            }
        };

        let activity = self
            .deps
            .db
            .list_activity_since(client.id, now - Duration::days(7))
            .await?;

        let text = format!(
            "{} - Last 7 Days\n\n\
             Profile Views: {}\n\
             Website Clicks: {}\n\
             Phone Calls: {}\n\
             Direction Requests: {}\n\n\
             {}",
            client.business_name,
            metrics.impressions,
            metrics.website_clicks,
            metrics.call_clicks,
            metrics.direction_requests,
            weekly_activity_line(&activity),
        );
        self.confirmation_with_menu(client, &text).await
    }

    async fn send_review_link(&self, client: &Client) -> Result<()> {
        let text = match &client.place_id {
            Some(place_id) => format!(
                "Share this link with happy customers to collect reviews:\n\n\
                 https://search.google.com/local/writereview?placeid={place_id}\n\n\
                 Tip: send it right after finishing a job, while the work is fresh in \
                 their mind."
            ),
            None => "Your review link isn't set up yet. We'll sort that during onboarding."
                .to_string(),
        };
        self.confirmation_with_menu(client, &text).await
    }
}

/// Example briefs shown when asking for a post or offer, per trade.
///
/// `{area}` is replaced with the client's first service area so the
/// examples read like something they would actually type.
struct TradeExamples {
    post: [&'static str; 2],
    offer: [&'static str; 2],
}

const TRADE_EXAMPLES: &[(&str, TradeExamples)] = &[
    (
        "electrician",
        TradeExamples {
            post: [
                "just rewired a house in {area}",
                "fitted new consumer unit and EV charger in {area}",
            ],
            offer: [
                "Free electrical safety check with any rewire",
                "€50 off EV charger installation",
            ],
        },
    ),
    (
        "plumber",
        TradeExamples {
            post: [
                "emergency boiler repair in {area}, back up and running same day",
                "installed new bathroom suite in {area}",
            ],
            offer: [
                "Free boiler service with any repair",
                "€100 off bathroom renovations",
            ],
        },
    ),
    (
        "carpenter",
        TradeExamples {
            post: [
                "fitted bespoke wardrobes in {area}",
                "finished a custom kitchen in {area}",
            ],
            offer: [
                "Free design consultation on wardrobes",
                "10% off kitchen fitting",
            ],
        },
    ),
    (
        "builder",
        TradeExamples {
            post: [
                "extension completed in {area}",
                "attic conversion finished in {area}",
            ],
            offer: ["Free quote on extensions", "10% off attic conversions"],
        },
    ),
    (
        "roofer",
        TradeExamples {
            post: [
                "full roof replacement completed in {area}",
                "emergency leak repair in {area}",
            ],
            offer: ["Free roof inspection", "€300 off full roof replacements"],
        },
    ),
    (
        "painter",
        TradeExamples {
            post: [
                "full house repaint finished in {area}",
                "exterior painting and window frame restoration in {area}",
            ],
            offer: ["Free colour consultation", "10% off exterior painting"],
        },
    ),
    (
        "tiler",
        TradeExamples {
            post: [
                "kitchen and bathroom tiling completed in {area}",
                "wetroom tiling and waterproofing in {area}",
            ],
            offer: ["Free tiling quote", "10% off bathroom tiling"],
        },
    ),
    (
        "landscaper",
        TradeExamples {
            post: [
                "new driveway and front garden landscaping in {area}",
                "decking and raised beds built in {area}",
            ],
            offer: ["Free garden design consultation", "10% off driveways"],
        },
    ),
];

const GENERIC_EXAMPLES: TradeExamples = TradeExamples {
    post: [
        "just finished a job in {area}",
        "now offering emergency callouts in {area}",
    ],
    offer: ["10% off this month", "Free quote on all jobs"],
};

fn trade_examples(trade_type: &str) -> &'static TradeExamples {
    let trade = trade_type.to_lowercase();
    TRADE_EXAMPLES
        .iter()
        .find(|(name, _)| *name == trade)
        .map(|(_, examples)| examples)
        .unwrap_or(&GENERIC_EXAMPLES)
}

fn first_area(client: &Client) -> &str {
    client
        .service_areas
        .first()
        .map(String::as_str)
        .unwrap_or("your area")
}

fn post_brief_prompt(client: &Client) -> String {
    let examples = trade_examples(&client.trade_type);
    let area = first_area(client);
    format!(
        "What would you like to post about? Just describe it in your own words, \
         e.g. '{}' or '{}'.",
        examples.post[0].replace("{area}", area),
        examples.post[1].replace("{area}", area),
    )
}

fn offer_brief_prompt(client: &Client) -> String {
    let examples = trade_examples(&client.trade_type);
    format!(
        "What's the offer? Describe it in your own words, e.g. '{}' or '{}'.",
        examples.offer[0], examples.offer[1],
    )
}

/// Summarize the week's successful publishes for the stats view.
fn weekly_activity_line(records: &[ActivityRecord]) -> String {
    let mut photos = 0;
    let mut posts = 0;
    let mut replies = 0;
    for record in records {
        if record.status != ActivityStatus::Success {
            continue;
        }
        match record.kind {
            ActivityKind::PhotoPublished => photos += 1,
            ActivityKind::PostPublished | ActivityKind::OfferPublished => posts += 1,
            ActivityKind::ReviewReplied => replies += 1,
            _ => {}
        }
    }
    format!(
        "This week: {photos} photo{} posted, {posts} post{} published, {replies} review{} replied to",
        plural(photos),
        plural(posts),
        plural(replies),
    )
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn menu_sections() -> Vec<ListSection> {
    vec![
        ListSection {
            title: "Google Profile".to_string(),
            rows: vec![
                ListRow::new(MENU_POST, "Create a Post")
                    .with_description("Share an update with AI help"),
                ListRow::new(MENU_OFFER, "Create an Offer")
                    .with_description("Run a limited-time promotion"),
                ListRow::new(MENU_STATS, "View My Stats")
                    .with_description("Last 7 days of profile activity"),
            ],
        },
        ListSection {
            title: "Reviews".to_string(),
            rows: vec![
                ListRow::new(MENU_REVIEW_LINK, "Get Review Link")
                    .with_description("Link to send to customers"),
            ],
        },
        ListSection {
            title: "Help".to_string(),
            rows: vec![ListRow::new(MENU_HELP, "What Can You Do?")],
        },
    ]
}
