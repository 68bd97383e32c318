//! External collaborators: chat transport, listing platform, AI draft
//! generation, static-site publishing.

pub mod generator;
pub mod listing;
pub mod site;
pub mod transport;

pub use generator::{BusinessContext, DraftGenerator, RigGenerator};
pub use listing::{HttpListingClient, ListingClient, RemoteReview, WeeklyMetrics};
pub use site::{GitHubSitePublisher, SitePublisher};
pub use transport::{Button, ChatTransport, HttpChatTransport, ListRow, ListSection};
