//! Filtered image query.
//!
//! A `FilterCriteria` is turned into one `SELECT DISTINCT i.id FROM images i`
//! statement by an ordered list of predicate stages. Each stage looks at the
//! criteria and either contributes joins, conditions and bound values or
//! does nothing. Matched ids are then resolved to metadata rows in batches.

use rusqlite::params_from_iter;
use rusqlite::types::Value;

use super::criteria::{FilterCriteria, TagMode, NSFW_RATINGS};
use super::images::{images_by_ids, processed_chunk_into, ID_BATCH_SIZE};
use super::models::ImageMetadata;
use super::pattern::{compile_pattern, LIKE_ESCAPE};
use super::resolution::select_best_resolution;
use super::{format_timestamp, Database};
use crate::cancel::CancelFlag;
use crate::error::Result;

/// Joins, conditions and bound values accumulated by the stages.
#[derive(Debug, Default)]
struct IdQuery {
    joins: Vec<String>,
    conditions: Vec<String>,
    params: Vec<Value>,
    /// Set by the untagged stage; later tag and caption terms are ignored.
    untagged: bool,
}

impl IdQuery {
    fn bind(&mut self, value: impl Into<Value>) {
        self.params.push(value.into());
    }

    fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT DISTINCT i.id FROM images i");
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY i.id");
        sql
    }
}

type Stage = fn(&FilterCriteria, &mut IdQuery);

/// Predicate stages in application order.
const STAGES: &[(&str, Stage)] = &[
    ("date", date_stage),
    ("tags", tag_stage),
    ("caption", caption_stage),
    ("manual", manual_stage),
    ("ai_rating", ai_rating_stage),
    ("score", score_stage),
    ("nsfw", nsfw_stage),
];

fn date_stage(criteria: &FilterCriteria, query: &mut IdQuery) {
    if let Some(start) = criteria.start_date {
        query.conditions.push("i.updated_at >= ?".to_string());
        query.bind(format_timestamp(start));
    }
    if let Some(end) = criteria.end_date {
        query.conditions.push("i.updated_at <= ?".to_string());
        query.bind(format_timestamp(end));
    }
}

fn tag_stage(criteria: &FilterCriteria, query: &mut IdQuery) {
    if criteria.include_untagged {
        query.untagged = true;
        query
            .joins
            .push("LEFT JOIN tags t_none ON t_none.image_id = i.id".to_string());
        query.conditions.push("t_none.id IS NULL".to_string());
        return;
    }
    if !criteria.has_tag_terms() {
        return;
    }

    match criteria.tag_mode {
        TagMode::All => {
            // One correlated existence check per tag, so each tag needs its own row.
            for tag in &criteria.tags {
                query.conditions.push(format!(
                    "EXISTS (SELECT 1 FROM tags t WHERE t.image_id = i.id AND t.tag LIKE ? {})",
                    LIKE_ESCAPE
                ));
                query.bind(compile_pattern(tag).pattern);
            }
        }
        TagMode::Any => {
            query
                .joins
                .push("JOIN tags t_any ON t_any.image_id = i.id".to_string());
            let mut alternatives = Vec::with_capacity(criteria.tags.len());
            for tag in &criteria.tags {
                alternatives.push(format!("t_any.tag LIKE ? {}", LIKE_ESCAPE));
                query.bind(compile_pattern(tag).pattern);
            }
            query
                .conditions
                .push(format!("({})", alternatives.join(" OR ")));
        }
    }
}

fn caption_stage(criteria: &FilterCriteria, query: &mut IdQuery) {
    if query.untagged {
        return;
    }
    if let Some(caption) = criteria.caption.as_deref() {
        query.conditions.push(format!(
            "EXISTS (SELECT 1 FROM captions c WHERE c.image_id = i.id AND c.caption LIKE ? {})",
            LIKE_ESCAPE
        ));
        query.bind(compile_pattern(caption).pattern);
    }
}

fn manual_stage(criteria: &FilterCriteria, query: &mut IdQuery) {
    if let Some(rating) = criteria.manual_rating_filter.as_deref() {
        if criteria.include_unrated {
            query
                .conditions
                .push("(UPPER(i.manual_rating) = UPPER(?) OR i.manual_rating IS NULL)".to_string());
        } else {
            query
                .conditions
                .push("UPPER(i.manual_rating) = UPPER(?)".to_string());
        }
        query.bind(rating.to_string());
    }

    if let Some(edited) = criteria.manual_edit_filter {
        let any_edited = "(EXISTS (SELECT 1 FROM tags te WHERE te.image_id = i.id AND te.is_edited_manually = 1) \
             OR EXISTS (SELECT 1 FROM captions ce WHERE ce.image_id = i.id AND ce.is_edited_manually = 1) \
             OR EXISTS (SELECT 1 FROM scores se WHERE se.image_id = i.id AND se.is_edited_manually = 1))";
        if edited {
            query.conditions.push(any_edited.to_string());
        } else {
            query.conditions.push(format!("NOT {}", any_edited));
        }
    }
}

fn ai_rating_stage(criteria: &FilterCriteria, query: &mut IdQuery) {
    let Some(rating) = criteria.ai_rating_filter.as_deref() else {
        return;
    };
    let matches_rating = "EXISTS (SELECT 1 FROM ratings r WHERE r.image_id = i.id \
         AND UPPER(TRIM(r.normalized_rating)) = UPPER(?))";
    if criteria.include_unrated {
        query.conditions.push(format!(
            "({} OR NOT EXISTS (SELECT 1 FROM ratings ru WHERE ru.image_id = i.id))",
            matches_rating
        ));
    } else {
        query.conditions.push(matches_rating.to_string());
    }
    query.bind(rating.trim().to_string());
}

fn score_stage(criteria: &FilterCriteria, query: &mut IdQuery) {
    if criteria.score_min.is_none() && criteria.score_max.is_none() {
        return;
    }
    let mut bounds = Vec::new();
    if let Some(min) = criteria.score_min {
        bounds.push("s.score >= ?");
        query.bind(min);
    }
    if let Some(max) = criteria.score_max {
        bounds.push("s.score <= ?");
        query.bind(max);
    }
    query.conditions.push(format!(
        "EXISTS (SELECT 1 FROM scores s WHERE s.image_id = i.id AND {})",
        bounds.join(" AND ")
    ));
}

fn nsfw_stage(criteria: &FilterCriteria, query: &mut IdQuery) {
    if !criteria.excludes_nsfw() {
        return;
    }
    let list = vec!["?"; NSFW_RATINGS.len()].join(",");
    query.conditions.push(format!(
        "NOT (EXISTS (SELECT 1 FROM ratings rn WHERE rn.image_id = i.id \
              AND UPPER(TRIM(rn.normalized_rating)) IN ({list})) \
         OR UPPER(TRIM(COALESCE(i.manual_rating, ''))) IN ({list}))"
    ));
    for _ in 0..2 {
        for rating in NSFW_RATINGS {
            query.bind(rating.to_string());
        }
    }
}

fn build_id_query(criteria: &FilterCriteria) -> IdQuery {
    let mut query = IdQuery::default();
    for (_name, stage) in STAGES {
        stage(criteria, &mut query);
    }
    query
}

impl Database {
    /// Find images matching `criteria`. Returns the metadata rows and their count.
    pub fn find_images(&self, criteria: &FilterCriteria) -> Result<(Vec<ImageMetadata>, usize)> {
        self.find_images_cancellable(criteria, &CancelFlag::new())
    }

    /// Like [`Database::find_images`], checking `cancel` between the id query
    /// and each resolution batch. Returns `Cancelled` once it is set.
    pub fn find_images_cancellable(
        &self,
        criteria: &FilterCriteria,
        cancel: &CancelFlag,
    ) -> Result<(Vec<ImageMetadata>, usize)> {
        cancel.checkpoint()?;

        if criteria.include_untagged && (criteria.has_tag_terms() || criteria.caption.is_some()) {
            tracing::debug!("untagged search requested; tag and caption terms are ignored");
        }

        let query = build_id_query(criteria);
        let sql = query.to_sql();
        tracing::trace!(%sql, params = query.params.len(), "image id query");

        let mut conn = self.connect()?;
        // Deferred transaction: every batch reads the same snapshot.
        let tx = conn.transaction()?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(query.params.iter()), |row| row.get(0))?;
            let ids = rows.collect::<rusqlite::Result<Vec<i64>>>()?;
            ids
        };

        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_BATCH_SIZE) {
            cancel.checkpoint()?;
            let images = images_by_ids(&tx, chunk)?;

            if criteria.resolution == 0 {
                records.extend(
                    chunk
                        .iter()
                        .filter_map(|id| images.get(id))
                        .map(ImageMetadata::from_original),
                );
                continue;
            }

            let mut variants = std::collections::HashMap::new();
            processed_chunk_into(&tx, chunk, &mut variants)?;
            for id in chunk {
                let candidates = variants.get(id).map(Vec::as_slice).unwrap_or(&[]);
                if let Some(best) = select_best_resolution(criteria.resolution as i64, candidates) {
                    let manual_rating = images.get(id).and_then(|image| image.manual_rating.clone());
                    records.push(ImageMetadata::from_processed(best, manual_rating));
                }
            }
        }
        tx.commit()?;

        let count = records.len();
        tracing::debug!(
            matched_ids = ids.len(),
            count,
            resolution = criteria.resolution,
            "image query finished"
        );
        Ok((records, count))
    }
}
