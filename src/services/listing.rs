//! Business-listing platform client (local posts, reviews, metrics).
//!
//! Wraps the listing REST API behind the [`ListingClient`] trait. Publish
//! calls return the remote resource name so items can record what was
//! created. Review fetches return only unanswered reviews newer than the
//! requested cutoff.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;
use crate::error::ListingError;
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::model::Client;

const REVIEWS_PAGE_SIZE: u32 = 50;

/// A review fetched from the listing platform, not yet replied to.
#[derive(Debug, Clone)]
pub struct RemoteReview {
    /// Full resource name, unique per review.
    pub review_ref: String,
    pub reviewer_name: String,
    pub rating: u8,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

/// Aggregated listing performance over one reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeeklyMetrics {
    pub impressions: u64,
    pub website_clicks: u64,
    pub call_clicks: u64,
    pub direction_requests: u64,
}

/// Listing platform operations used by the engines and jobs.
#[async_trait]
pub trait ListingClient: Send + Sync {
    /// Publish a standard text post. Returns the remote post name.
    async fn publish_text(&self, client: &Client, text: &str) -> Result<String, ListingError>;

    /// Publish an offer post with validity window and call-to-action.
    async fn publish_offer(
        &self,
        client: &Client,
        text: &str,
        end_date: DateTime<Utc>,
        cta_type: &str,
    ) -> Result<String, ListingError>;

    /// Publish a photo with a caption. Returns the remote media name.
    async fn publish_photo(
        &self,
        client: &Client,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<String, ListingError>;

    /// Unanswered reviews updated since `since`, newest first.
    async fn fetch_reviews(
        &self,
        client: &Client,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteReview>, ListingError>;

    /// Publish a reply to a review.
    async fn reply_to_review(
        &self,
        client: &Client,
        review_ref: &str,
        reply: &str,
    ) -> Result<(), ListingError>;

    /// Performance metrics for the given date window.
    async fn fetch_metrics(
        &self,
        client: &Client,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WeeklyMetrics, ListingError>;
}

/// HTTP listing client.
pub struct HttpListingClient {
    http: reqwest::Client,
    api_base: String,
    metrics_base: String,
    token: SecretString,
    retry: RetryPolicy,
}

impl HttpListingClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.listing_api_base.clone(),
            metrics_base: config.metrics_api_base.clone(),
            token: config.listing_token.clone(),
            retry: RetryPolicy::default(),
        }
    }

    fn location_parent(&self, client: &Client) -> Result<String, ListingError> {
        let (account, location) = client.listing_refs().ok_or(ListingError::NotConfigured {
            client_id: client.id,
        })?;
        Ok(format!("{account}/{location}"))
    }

    async fn post_json(&self, url: &str, body: Value) -> Result<Value, ListingError> {
        with_backoff(&self.retry, || {
            let body = body.clone();
            async move {
                let response = self
                    .http
                    .post(url)
                    .bearer_auth(self.token.expose_secret())
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ListingError::Request(e.to_string()))?;
                read_json(response).await
            }
        })
        .await
    }

    async fn create_local_post(
        &self,
        client: &Client,
        body: Value,
    ) -> Result<String, ListingError> {
        let parent = self.location_parent(client)?;
        let url = format!("{}/{}/localPosts", self.api_base, parent);
        let created = self.post_json(&url, body).await?;
        Ok(resource_name(&created))
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, ListingError> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(ListingError::Api {
            status: status.as_u16(),
            detail,
        });
    }
    response
        .json()
        .await
        .map_err(|e| ListingError::Request(e.to_string()))
}

fn resource_name(value: &Value) -> String {
    value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn date_json(date: DateTime<Utc>) -> Value {
    json!({
        "year": date.year(),
        "month": date.month(),
        "day": date.day(),
    })
}

#[async_trait]
impl ListingClient for HttpListingClient {
    async fn publish_text(&self, client: &Client, text: &str) -> Result<String, ListingError> {
        debug!(client_id = client.id, "Publishing standard post");
        self.create_local_post(
            client,
            json!({
                "languageCode": "en",
                "topicType": "STANDARD",
                "summary": text,
            }),
        )
        .await
    }

    async fn publish_offer(
        &self,
        client: &Client,
        text: &str,
        end_date: DateTime<Utc>,
        cta_type: &str,
    ) -> Result<String, ListingError> {
        debug!(client_id = client.id, "Publishing offer post");
        self.create_local_post(
            client,
            json!({
                "languageCode": "en",
                "topicType": "OFFER",
                "summary": text,
                "callToAction": { "actionType": cta_type },
                "event": {
                    "title": "Special Offer",
                    "schedule": {
                        "startDate": date_json(Utc::now()),
                        "endDate": date_json(end_date),
                    },
                },
            }),
        )
        .await
    }

    async fn publish_photo(
        &self,
        client: &Client,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<String, ListingError> {
        debug!(client_id = client.id, size = bytes.len(), "Publishing photo");
        let parent = self.location_parent(client)?;
        let url = format!("{}/{}/media", self.api_base, parent);

        let metadata = json!({
            "mediaFormat": "PHOTO",
            "locationAssociation": { "category": "ADDITIONAL" },
            "description": caption,
        })
        .to_string();

        // Multipart uploads are not replayed: an ambiguous failure after
        // the body was sent must not create duplicate media.
        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata)
            .part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).mime_str("image/jpeg").map_err(|e| ListingError::Request(e.to_string()))?,
            );

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ListingError::Request(e.to_string()))?;

        let created = read_json(response).await?;
        Ok(resource_name(&created))
    }

    async fn fetch_reviews(
        &self,
        client: &Client,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteReview>, ListingError> {
        let parent = self.location_parent(client)?;
        let mut reviews = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/{}/reviews?pageSize={}&orderBy=updateTime%20desc",
                self.api_base, parent, REVIEWS_PAGE_SIZE
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={token}"));
            }

            let page = with_backoff(&self.retry, || {
                let url = url.clone();
                async move {
                    let response = self
                        .http
                        .get(&url)
                        .bearer_auth(self.token.expose_secret())
                        .send()
                        .await
                        .map_err(|e| ListingError::Request(e.to_string()))?;
                    read_json(response).await
                }
            })
            .await?;

            let mut reached_cutoff = false;
            if let Some(items) = page.get("reviews").and_then(Value::as_array) {
                for item in items {
                    match parse_review(item) {
                        Some(review) if review.updated_at >= since => reviews.push(review),
                        Some(_) => {
                            // Ordered by update time, so everything past
                            // this point is older than the cutoff.
                            reached_cutoff = true;
                            break;
                        }
                        None => {}
                    }
                }
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from);
            if reached_cutoff || page_token.is_none() {
                break;
            }
        }

        debug!(
            client_id = client.id,
            count = reviews.len(),
            "Fetched unanswered reviews"
        );
        Ok(reviews)
    }

    async fn reply_to_review(
        &self,
        client: &Client,
        review_ref: &str,
        reply: &str,
    ) -> Result<(), ListingError> {
        debug!(client_id = client.id, review_ref, "Replying to review");
        let url = format!("{}/{}/reply", self.api_base, review_ref);

        with_backoff(&self.retry, || async {
            let response = self
                .http
                .put(&url)
                .bearer_auth(self.token.expose_secret())
                .json(&json!({ "comment": reply }))
                .send()
                .await
                .map_err(|e| ListingError::Request(e.to_string()))?;
            read_json(response).await.map(|_| ())
        })
        .await
    }

    async fn fetch_metrics(
        &self,
        client: &Client,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WeeklyMetrics, ListingError> {
        let (_, location) = client.listing_refs().ok_or(ListingError::NotConfigured {
            client_id: client.id,
        })?;

        let metrics = [
            "BUSINESS_IMPRESSIONS_DESKTOP_SEARCH",
            "BUSINESS_IMPRESSIONS_MOBILE_SEARCH",
            "BUSINESS_IMPRESSIONS_DESKTOP_MAPS",
            "BUSINESS_IMPRESSIONS_MOBILE_MAPS",
            "WEBSITE_CLICKS",
            "CALL_CLICKS",
            "BUSINESS_DIRECTION_REQUESTS",
        ];
        let metric_params: String = metrics
            .iter()
            .map(|m| format!("&dailyMetrics={m}"))
            .collect();

        let url = format!(
            "{}/{}:fetchMultiDailyMetricsTimeSeries?\
             dailyRange.start_date.year={}&dailyRange.start_date.month={}&dailyRange.start_date.day={}&\
             dailyRange.end_date.year={}&dailyRange.end_date.month={}&dailyRange.end_date.day={}{}",
            self.metrics_base,
            location,
            start.year(),
            start.month(),
            start.day(),
            end.year(),
            end.month(),
            end.day(),
            metric_params,
        );

        let body = with_backoff(&self.retry, || {
            let url = url.clone();
            async move {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(self.token.expose_secret())
                    .send()
                    .await
                    .map_err(|e| ListingError::Request(e.to_string()))?;
                read_json(response).await
            }
        })
        .await?;

        Ok(parse_metrics(&body))
    }
}

/// Parse one review resource. Returns `None` for reviews that already have
/// a reply or carry no usable fields.
fn parse_review(value: &Value) -> Option<RemoteReview> {
    if value.get("reviewReply").is_some() {
        return None;
    }

    let review_ref = value.get("name")?.as_str()?.to_string();
    let updated_at = value
        .get("updateTime")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;

    Some(RemoteReview {
        review_ref,
        reviewer_name: value
            .pointer("/reviewer/displayName")
            .and_then(Value::as_str)
            .unwrap_or("A customer")
            .to_string(),
        rating: star_rating(
            value
                .get("starRating")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        ),
        text: value
            .get("comment")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        updated_at,
    })
}

fn star_rating(s: &str) -> u8 {
    match s {
        "ONE" => 1,
        "TWO" => 2,
        "THREE" => 3,
        "FOUR" => 4,
        "FIVE" => 5,
        _ => 0,
    }
}

/// Sum the daily time series into one metrics window. Impression variants
/// all fold into `impressions`.
fn parse_metrics(body: &Value) -> WeeklyMetrics {
    let mut metrics = WeeklyMetrics::default();

    let series = body
        .get("multiDailyMetricTimeSeries")
        .and_then(Value::as_array);
    let Some(series) = series else {
        return metrics;
    };

    for group in series {
        let Some(daily) = group.get("dailyMetricTimeSeries").and_then(Value::as_array) else {
            continue;
        };
        for entry in daily {
            let name = entry
                .get("dailyMetric")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let total: u64 = entry
                .pointer("/timeSeries/datedValues")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| {
                            v.get("value").and_then(|raw| {
                                raw.as_u64().or_else(|| raw.as_str()?.parse().ok())
                            })
                        })
                        .sum()
                })
                .unwrap_or(0);

            match name {
                "WEBSITE_CLICKS" => metrics.website_clicks += total,
                "CALL_CLICKS" => metrics.call_clicks += total,
                "BUSINESS_DIRECTION_REQUESTS" => metrics.direction_requests += total,
                name if name.starts_with("BUSINESS_IMPRESSIONS") => {
                    metrics.impressions += total;
                }
                _ => {}
            }
        }
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_rating_mapping() {
        assert_eq!(star_rating("FIVE"), 5);
        assert_eq!(star_rating("ONE"), 1);
        assert_eq!(star_rating("STAR_RATING_UNSPECIFIED"), 0);
    }

    #[test]
    fn parse_review_skips_answered() {
        let answered = json!({
            "name": "accounts/1/locations/2/reviews/abc",
            "starRating": "FIVE",
            "comment": "Great work",
            "updateTime": "2026-08-20T10:00:00Z",
            "reviewer": { "displayName": "Aoife" },
            "reviewReply": { "comment": "Thanks!" },
        });
        assert!(parse_review(&answered).is_none());
    }

    #[test]
    fn parse_review_maps_fields() {
        let raw = json!({
            "name": "accounts/1/locations/2/reviews/abc",
            "starRating": "FOUR",
            "comment": "Tidy job, quick turnaround",
            "updateTime": "2026-08-20T10:00:00Z",
            "reviewer": { "displayName": "Aoife" },
        });
        let review = parse_review(&raw).unwrap();
        assert_eq!(review.review_ref, "accounts/1/locations/2/reviews/abc");
        assert_eq!(review.rating, 4);
        assert_eq!(review.reviewer_name, "Aoife");
        assert_eq!(review.text, "Tidy job, quick turnaround");
    }

    #[test]
    fn parse_review_defaults_anonymous_reviewer() {
        let raw = json!({
            "name": "accounts/1/locations/2/reviews/xyz",
            "starRating": "FIVE",
            "updateTime": "2026-08-20T10:00:00Z",
        });
        let review = parse_review(&raw).unwrap();
        assert_eq!(review.reviewer_name, "A customer");
        assert_eq!(review.text, "");
    }

    #[test]
    fn parse_metrics_sums_series() {
        let body = json!({
            "multiDailyMetricTimeSeries": [{
                "dailyMetricTimeSeries": [
                    {
                        "dailyMetric": "BUSINESS_IMPRESSIONS_DESKTOP_SEARCH",
                        "timeSeries": { "datedValues": [
                            { "value": "10" }, { "value": "5" },
                        ]},
                    },
                    {
                        "dailyMetric": "BUSINESS_IMPRESSIONS_MOBILE_MAPS",
                        "timeSeries": { "datedValues": [ { "value": 7 } ]},
                    },
                    {
                        "dailyMetric": "WEBSITE_CLICKS",
                        "timeSeries": { "datedValues": [
                            { "value": "3" }, {},
                        ]},
                    },
                    {
                        "dailyMetric": "CALL_CLICKS",
                        "timeSeries": { "datedValues": [ { "value": "2" } ]},
                    },
                    {
                        "dailyMetric": "BUSINESS_DIRECTION_REQUESTS",
                        "timeSeries": { "datedValues": [ { "value": "1" } ]},
                    },
                ],
            }],
        });

        let metrics = parse_metrics(&body);
        assert_eq!(metrics.impressions, 22);
        assert_eq!(metrics.website_clicks, 3);
        assert_eq!(metrics.call_clicks, 2);
        assert_eq!(metrics.direction_requests, 1);
    }

    #[test]
    fn parse_metrics_tolerates_empty_body() {
        assert_eq!(parse_metrics(&json!({})), WeeklyMetrics::default());
    }

    #[test]
    fn date_json_shape() {
        let date = DateTime::parse_from_rfc3339("2026-08-25T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            date_json(date),
            json!({ "year": 2026, "month": 8, "day": 25 })
        );
    }
}
