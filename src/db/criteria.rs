//! Immutable description of an image metadata query.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Manual ratings (and normalized AI ratings) treated as NSFW.
pub const NSFW_RATINGS: [&str; 3] = ["R", "X", "XXX"];

/// Whether a rating value is one of the NSFW ratings, ignoring case.
pub fn is_nsfw_rating(rating: &str) -> bool {
    let rating = rating.trim();
    NSFW_RATINGS.iter().any(|r| r.eq_ignore_ascii_case(rating))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMode {
    /// Every requested tag must be present.
    #[default]
    All,
    /// At least one requested tag must be present.
    Any,
}

/// Query filter. Build it with the `with_*` methods; it is not mutated
/// once handed to the query engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCriteria {
    pub tags: Vec<String>,
    pub tag_mode: TagMode,
    pub caption: Option<String>,
    /// Target long-edge resolution; 0 means the original image.
    pub resolution: u32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Only images without any tag. Tag and caption terms are ignored.
    pub include_untagged: bool,
    pub include_nsfw: bool,
    /// Rating filters also accept images without a rating of that kind.
    pub include_unrated: bool,
    pub manual_rating_filter: Option<String>,
    pub ai_rating_filter: Option<String>,
    pub manual_edit_filter: Option<bool>,
    pub score_min: Option<f64>,
    pub score_max: Option<f64>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            tag_mode: TagMode::All,
            caption: None,
            resolution: 0,
            start_date: None,
            end_date: None,
            include_untagged: false,
            include_nsfw: false,
            include_unrated: false,
            manual_rating_filter: None,
            ai_rating_filter: None,
            manual_edit_filter: None,
            score_min: None,
            score_max: None,
        }
    }
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank terms are dropped.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().filter_map(|tag| non_empty(tag)).collect();
        self
    }

    pub fn with_tag_mode(mut self, mode: TagMode) -> Self {
        self.tag_mode = mode;
        self
    }

    pub fn match_any(self) -> Self {
        self.with_tag_mode(TagMode::Any)
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = non_empty(caption);
        self
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_date_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Naive bounds are taken as UTC.
    pub fn with_naive_date_range(self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.with_date_range(start.map(|dt| dt.and_utc()), end.map(|dt| dt.and_utc()))
    }

    pub fn untagged_only(mut self) -> Self {
        self.include_untagged = true;
        self
    }

    pub fn with_nsfw(mut self, include: bool) -> Self {
        self.include_nsfw = include;
        self
    }

    pub fn with_unrated(mut self, include: bool) -> Self {
        self.include_unrated = include;
        self
    }

    pub fn with_manual_rating(mut self, rating: impl Into<String>) -> Self {
        self.manual_rating_filter = non_empty(rating);
        self
    }

    pub fn with_ai_rating(mut self, rating: impl Into<String>) -> Self {
        self.ai_rating_filter = non_empty(rating);
        self
    }

    pub fn with_manual_edit(mut self, edited: bool) -> Self {
        self.manual_edit_filter = Some(edited);
        self
    }

    pub fn with_score_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.score_min = min;
        self.score_max = max;
        self
    }

    pub fn has_tag_terms(&self) -> bool {
        !self.tags.is_empty()
    }

    /// An explicit NSFW manual rating request overrides NSFW exclusion.
    pub fn excludes_nsfw(&self) -> bool {
        if self.include_nsfw {
            return false;
        }
        !self
            .manual_rating_filter
            .as_deref()
            .is_some_and(is_nsfw_rating)
    }
}
