//! Structured action identifiers for interactive button presses.
//!
//! Every decision button carries an id of the form `{kind}_{verb}_{item_id}`
//! (e.g. `post_approve_42`). The id is parsed once at the router boundary
//! into an [`ActionId`]; engines only ever see the structured form.

use std::str::FromStr;

use crate::store::model::ItemKind;

/// What the user asked to do with a workflow item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVerb {
    Approve,
    Edit,
    Skip,
    /// Publish without attaching a photo (post/offer photo prompt).
    PhotoSkip,
}

impl ActionVerb {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Edit => "edit",
            Self::Skip => "skip",
            Self::PhotoSkip => "photo_skip",
        }
    }
}

impl std::fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed decision-button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionId {
    pub kind: ItemKind,
    pub verb: ActionVerb,
    pub item_id: i64,
}

impl ActionId {
    pub fn new(kind: ItemKind, verb: ActionVerb, item_id: i64) -> Self {
        Self {
            kind,
            verb,
            item_id,
        }
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.kind, self.verb, self.item_id)
    }
}

impl FromStr for ActionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = if let Some(rest) = s.strip_prefix("post_") {
            (ItemKind::Post, rest)
        } else if let Some(rest) = s.strip_prefix("offer_") {
            (ItemKind::Offer, rest)
        } else if let Some(rest) = s.strip_prefix("review_") {
            (ItemKind::Review, rest)
        } else {
            return Err(format!("Unknown action kind prefix: {s}"));
        };

        // photo_skip before skip: the longer verb shares a suffix token.
        let (verb, rest) = if let Some(rest) = rest.strip_prefix("photo_skip_") {
            (ActionVerb::PhotoSkip, rest)
        } else if let Some(rest) = rest.strip_prefix("approve_") {
            (ActionVerb::Approve, rest)
        } else if let Some(rest) = rest.strip_prefix("edit_") {
            (ActionVerb::Edit, rest)
        } else if let Some(rest) = rest.strip_prefix("skip_") {
            (ActionVerb::Skip, rest)
        } else {
            return Err(format!("Unknown action verb: {s}"));
        };

        let item_id: i64 = rest
            .parse()
            .map_err(|_| format!("Invalid item id in action: {s}"))?;

        Ok(Self {
            kind,
            verb,
            item_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_verbs() {
        for kind in [ItemKind::Post, ItemKind::Offer, ItemKind::Review] {
            for verb in [
                ActionVerb::Approve,
                ActionVerb::Edit,
                ActionVerb::Skip,
                ActionVerb::PhotoSkip,
            ] {
                let action = ActionId::new(kind, verb, 42);
                let encoded = action.to_string();
                let parsed: ActionId = encoded.parse().unwrap();
                assert_eq!(parsed, action, "roundtrip failed for {encoded}");
            }
        }
    }

    #[test]
    fn parses_known_ids() {
        let action: ActionId = "post_approve_7".parse().unwrap();
        assert_eq!(action.kind, ItemKind::Post);
        assert_eq!(action.verb, ActionVerb::Approve);
        assert_eq!(action.item_id, 7);

        let action: ActionId = "offer_photo_skip_123".parse().unwrap();
        assert_eq!(action.kind, ItemKind::Offer);
        assert_eq!(action.verb, ActionVerb::PhotoSkip);
        assert_eq!(action.item_id, 123);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("menu_post".parse::<ActionId>().is_err());
        assert!("post_approve_".parse::<ActionId>().is_err());
        assert!("post_approve_abc".parse::<ActionId>().is_err());
        assert!("post_publish_1".parse::<ActionId>().is_err());
        assert!("review_42".parse::<ActionId>().is_err());
        assert!("".parse::<ActionId>().is_err());
    }
}
