//! Photo pipeline — download, re-encode, caption, publish to listing and
//! static site in parallel.
//!
//! Inbound photos arrive as transport media ids. While an item sits in
//! `awaiting_photo` the photo attaches to it; otherwise the photo itself is
//! the content and publishes standalone with its caption. Preparation runs
//! first and the item (when there is one) is claimed last, so a failed
//! download or decode leaves the flow intact.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::engine::{APOLOGY_PUBLISH, Deps, MenuFlow, transition_guarded};
use crate::error::{EngineError, Result, SiteError};
use crate::services::generator::BusinessContext;
use crate::store::model::{ActivityKind, ActivityStatus, Client, ItemStatus, WorkflowItem};

/// The photo pipeline.
pub struct PhotoPipeline {
    deps: Deps,
    menu: MenuFlow,
}

struct PreparedPhoto {
    bytes: Vec<u8>,
    caption: String,
}

impl PhotoPipeline {
    pub fn new(deps: Deps) -> Self {
        Self {
            menu: MenuFlow::new(deps.clone()),
            deps,
        }
    }

    /// Run the pipeline for an item awaiting its photo.
    pub async fn run(&self, client: &Client, item: &WorkflowItem, media_id: &str) -> Result<()> {
        let Some(prepared) = self.prepare(client, media_id, item.publish_text()).await? else {
            return Ok(());
        };

        // Claim last: preparation is side-effect free and retryable.
        if !transition_guarded(
            &self.deps.db,
            item,
            ItemStatus::AwaitingPhoto,
            item.approval_status(),
        )
        .await?
        {
            debug!(item_id = item.id, "Stale photo claim");
            return Ok(());
        }

        self.publish(client, Some(item), prepared).await
    }

    /// Publish a photo no item was waiting for.
    ///
    /// The message caption becomes the content; without one a generic
    /// project caption carries the client's business name.
    pub async fn publish_standalone(
        &self,
        client: &Client,
        media_id: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        let fallback = format!("New project by {}", client.business_name);
        let raw_caption = caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&fallback);

        let Some(prepared) = self.prepare(client, media_id, raw_caption).await? else {
            return Ok(());
        };
        self.publish(client, None, prepared).await
    }

    /// Download, re-encode and caption. `Ok(None)` means the user was told
    /// what went wrong and nothing was published.
    async fn prepare(
        &self,
        client: &Client,
        media_id: &str,
        raw_caption: &str,
    ) -> Result<Option<PreparedPhoto>> {
        let raw = match self.deps.chat.download_media(media_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(client_id = client.id, "Photo download failed: {e}");
                self.deps
                    .chat
                    .send_text(
                        &client.address,
                        "Sorry, I couldn't download that photo. Try sending it again.",
                    )
                    .await?;
                return Ok(None);
            }
        };

        let optimized = match optimize_image(
            &raw,
            self.deps.config.image_max_width,
            self.deps.config.image_jpeg_quality,
            self.deps.config.image_max_bytes,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(client_id = client.id, "Photo rejected: {e}");
                self.deps
                    .chat
                    .send_text(
                        &client.address,
                        "Sorry, I couldn't process that photo. Try a different one.",
                    )
                    .await?;
                return Ok(None);
            }
        };

        let context = BusinessContext::from(client);
        let caption = match self.deps.generator.polish_caption(&context, raw_caption).await {
            Ok(caption) => caption,
            Err(e) => {
                warn!(client_id = client.id, "Caption polish failed, using raw caption: {e}");
                raw_caption.to_string()
            }
        };

        Ok(Some(PreparedPhoto {
            bytes: optimized,
            caption,
        }))
    }

    async fn publish(
        &self,
        client: &Client,
        item: Option<&WorkflowItem>,
        prepared: PreparedPhoto,
    ) -> Result<()> {
        let now = Utc::now();
        let image_name = image_file_name(&client.business_name, now);
        let markdown =
            photo_page_markdown(&client.business_name, &prepared.caption, &image_name, now);

        let (listing_result, site_result) = tokio::join!(
            self.deps
                .listing
                .publish_photo(client, prepared.bytes.clone(), &prepared.caption),
            self.commit_site(client, &image_name, &prepared.bytes, &markdown),
        );

        self.report(client, item, listing_result, site_result).await
    }

    /// Commit the image and its markdown page. `Ok(None)` means the client
    /// has no site configured and the step was skipped.
    async fn commit_site(
        &self,
        client: &Client,
        image_name: &str,
        bytes: &[u8],
        markdown: &str,
    ) -> std::result::Result<Option<String>, SiteError> {
        let image_path = format!("src/assets/projects/{image_name}");
        match self
            .deps
            .site
            .commit_file(client, &image_path, bytes, &format!("Add project photo {image_name}"))
            .await
        {
            Ok(_) => {}
            Err(SiteError::NotConfigured { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }

        let page_name = image_name.trim_end_matches(".jpg");
        let page_path = format!("src/content/projects/{page_name}.md");
        let sha = self
            .deps
            .site
            .commit_file(
                client,
                &page_path,
                markdown.as_bytes(),
                &format!("Add project page {page_name}"),
            )
            .await?;
        Ok(Some(sha))
    }

    async fn report(
        &self,
        client: &Client,
        item: Option<&WorkflowItem>,
        listing_result: std::result::Result<String, crate::error::ListingError>,
        site_result: std::result::Result<Option<String>, SiteError>,
    ) -> Result<()> {
        let item_id = item.map(|i| i.id);
        match (listing_result, site_result) {
            (Ok(remote_ref), Ok(site)) => {
                if let Some(item) = item {
                    self.deps.db.set_item_remote_ref(item.id, &remote_ref).await?;
                }
                let on_site = site.is_some();
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::PhotoPublished,
                        ActivityStatus::Success,
                        Some(json!({
                            "item_id": item_id,
                            "remote_ref": remote_ref,
                            "site": on_site,
                        })),
                        None,
                    )
                    .await?;
                let confirmation = if on_site {
                    "Posted! Your photo is now on your Google Business Profile and website."
                } else {
                    "Posted! Your photo is now on your Google Business Profile."
                };
                self.menu.confirmation_with_menu(client, confirmation).await?;
            }
            (Ok(remote_ref), Err(site_err)) => {
                error!(client_id = client.id, "Site publish failed: {site_err}");
                if let Some(item) = item {
                    self.deps.db.set_item_remote_ref(item.id, &remote_ref).await?;
                }
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::PhotoPublished,
                        ActivityStatus::Success,
                        Some(json!({
                            "item_id": item_id,
                            "remote_ref": remote_ref,
                            "site": false,
                        })),
                        Some(&site_err.to_string()),
                    )
                    .await?;
                self.menu
                    .confirmation_with_menu(
                        client,
                        "Your photo is on your Google Business Profile, but the website \
                         update didn't go through. We'll look into it.",
                    )
                    .await?;
            }
            (Err(listing_err), Ok(Some(_))) => {
                error!(client_id = client.id, "Listing photo publish failed: {listing_err}");
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::PhotoPublished,
                        ActivityStatus::Failed,
                        Some(json!({ "item_id": item_id, "site": true })),
                        Some(&listing_err.to_string()),
                    )
                    .await?;
                self.menu
                    .confirmation_with_menu(
                        client,
                        "Your photo was added to your website, but the Google post didn't \
                         go through. We'll look into it.",
                    )
                    .await?;
            }
            (Err(listing_err), site) => {
                error!(client_id = client.id, "Photo publish failed everywhere: {listing_err}");
                let site_err = site.err().map(|e| e.to_string());
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::PhotoPublished,
                        ActivityStatus::Failed,
                        Some(json!({
                            "item_id": item_id,
                            "site_error": site_err,
                        })),
                        Some(&listing_err.to_string()),
                    )
                    .await?;
                self.deps
                    .chat
                    .send_text(&client.address, APOLOGY_PUBLISH)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Re-encode an inbound photo: enforce the size cap, downscale to the
/// configured max width, and emit JPEG at the configured quality.
pub fn optimize_image(
    bytes: &[u8],
    max_width: u32,
    quality: u8,
    max_bytes: usize,
) -> std::result::Result<Vec<u8>, EngineError> {
    if bytes.len() > max_bytes {
        return Err(EngineError::ImageTooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    let img =
        image::load_from_memory(bytes).map_err(|e| EngineError::ImageDecode(e.to_string()))?;

    let img = if img.width() > max_width {
        let height = ((u64::from(img.height()) * u64::from(max_width)) / u64::from(img.width()))
            .max(1) as u32;
        img.resize_exact(max_width, height, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let img = image::DynamicImage::ImageRgb8(img.to_rgb8());

    let mut out = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| EngineError::ImageDecode(e.to_string()))?;
    Ok(out.into_inner())
}

/// Dated, slugged file name for a committed photo.
pub fn image_file_name(business_name: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}.jpg", slugify(business_name), at.format("%Y-%m-%d-%H%M%S"))
}

/// Markdown page for the static site (Astro content collection layout).
pub fn photo_page_markdown(
    business_name: &str,
    caption: &str,
    image_name: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "---\n\
         title: \"New project by {business_name}\"\n\
         date: {}\n\
         image: ../../assets/projects/{image_name}\n\
         ---\n\n\
         {caption}\n",
        at.format("%Y-%m-%d")
    )
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}
