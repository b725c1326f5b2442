//! Idempotent merge of tags, captions, scores and ratings for one image.
//!
//! Rows are matched by each kind's uniqueness key: tag text and model,
//! caption text and model, or the model alone for scores and ratings. A known
//! key updates the stored row in place; a new key inserts one. All four kinds
//! are merged inside a single transaction.

use rusqlite::{params, Connection, Transaction};
use std::collections::HashMap;

use super::images::image_exists;
use super::models::{
    AnnotationBundle, CaptionAnnotation, CaptionRow, RatingAnnotation, RatingRow, ScoreAnnotation,
    ScoreRow, StoredAnnotations, TagAnnotation, TagRow,
};
use super::{now_timestamp, Database};
use crate::error::{CurioError, Result};

/// Rows inserted and updated by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl MergeCounts {
    fn record(&mut self, inserted: bool) {
        if inserted {
            self.inserted += 1;
        } else {
            self.updated += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub tags: MergeCounts,
    pub captions: MergeCounts,
    pub scores: MergeCounts,
    pub ratings: MergeCounts,
}

impl MergeSummary {
    pub fn inserted(&self) -> usize {
        self.tags.inserted + self.captions.inserted + self.scores.inserted + self.ratings.inserted
    }

    pub fn updated(&self) -> usize {
        self.tags.updated + self.captions.updated + self.scores.updated + self.ratings.updated
    }
}

fn validate_bundle(bundle: &AnnotationBundle) -> Result<()> {
    if bundle.tags.iter().any(|t| t.tag.trim().is_empty()) {
        return Err(CurioError::validation("tag annotation has empty text"));
    }
    if bundle.captions.iter().any(|c| c.caption.trim().is_empty()) {
        return Err(CurioError::validation("caption annotation has empty text"));
    }
    if bundle.scores.iter().any(|s| !s.score.is_finite()) {
        return Err(CurioError::validation("score annotation is not a finite number"));
    }
    if bundle
        .ratings
        .iter()
        .any(|r| r.normalized_rating.trim().is_empty())
    {
        return Err(CurioError::validation("rating annotation has empty normalized rating"));
    }
    Ok(())
}

fn merge_tags(tx: &Transaction<'_>, image_id: i64, tags: &[TagAnnotation], now: &str) -> Result<MergeCounts> {
    let mut counts = MergeCounts::default();
    if tags.is_empty() {
        return Ok(counts);
    }

    let mut lookup: HashMap<(String, Option<i64>), i64> = HashMap::new();
    {
        let mut stmt = tx.prepare_cached("SELECT id, tag, model_id FROM tags WHERE image_id = ?")?;
        let rows = stmt.query_map([image_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<i64>>(2)?))
        })?;
        for row in rows {
            let (id, tag, model_id) = row?;
            lookup.insert((tag, model_id), id);
        }
    }

    let mut update = tx.prepare_cached(
        "UPDATE tags SET confidence_score = ?, existing = ?, is_edited_manually = ?,
                tag_id = COALESCE(?, tag_id), updated_at = ?
         WHERE id = ?",
    )?;
    let mut insert = tx.prepare_cached(
        "INSERT INTO tags (tag_id, image_id, model_id, tag, existing, is_edited_manually,
                           confidence_score, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;

    for tag in tags {
        let key = (tag.tag.trim().to_string(), tag.model_id);
        match lookup.get(&key) {
            Some(&row_id) => {
                update.execute(params![
                    tag.confidence_score,
                    tag.existing,
                    tag.is_edited_manually,
                    tag.tag_id,
                    now,
                    row_id
                ])?;
                counts.record(false);
            }
            None => {
                insert.execute(params![
                    tag.tag_id,
                    image_id,
                    tag.model_id,
                    key.0,
                    tag.existing,
                    tag.is_edited_manually,
                    tag.confidence_score,
                    now,
                    now
                ])?;
                lookup.insert(key, tx.last_insert_rowid());
                counts.record(true);
            }
        }
    }
    Ok(counts)
}

fn merge_captions(
    tx: &Transaction<'_>,
    image_id: i64,
    captions: &[CaptionAnnotation],
    now: &str,
) -> Result<MergeCounts> {
    let mut counts = MergeCounts::default();
    if captions.is_empty() {
        return Ok(counts);
    }

    let mut lookup: HashMap<(String, Option<i64>), i64> = HashMap::new();
    {
        let mut stmt =
            tx.prepare_cached("SELECT id, caption, model_id FROM captions WHERE image_id = ?")?;
        let rows = stmt.query_map([image_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<i64>>(2)?))
        })?;
        for row in rows {
            let (id, caption, model_id) = row?;
            lookup.insert((caption, model_id), id);
        }
    }

    let mut update = tx.prepare_cached(
        "UPDATE captions SET confidence_score = ?, existing = ?, is_edited_manually = ?, updated_at = ?
         WHERE id = ?",
    )?;
    let mut insert = tx.prepare_cached(
        "INSERT INTO captions (image_id, model_id, caption, existing, is_edited_manually,
                               confidence_score, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )?;

    for caption in captions {
        let key = (caption.caption.trim().to_string(), caption.model_id);
        match lookup.get(&key) {
            Some(&row_id) => {
                update.execute(params![
                    caption.confidence_score,
                    caption.existing,
                    caption.is_edited_manually,
                    now,
                    row_id
                ])?;
                counts.record(false);
            }
            None => {
                insert.execute(params![
                    image_id,
                    caption.model_id,
                    key.0,
                    caption.existing,
                    caption.is_edited_manually,
                    caption.confidence_score,
                    now,
                    now
                ])?;
                lookup.insert(key, tx.last_insert_rowid());
                counts.record(true);
            }
        }
    }
    Ok(counts)
}

fn merge_scores(tx: &Transaction<'_>, image_id: i64, scores: &[ScoreAnnotation], now: &str) -> Result<MergeCounts> {
    let mut counts = MergeCounts::default();
    if scores.is_empty() {
        return Ok(counts);
    }

    let mut lookup: HashMap<Option<i64>, i64> = HashMap::new();
    {
        let mut stmt = tx.prepare_cached("SELECT id, model_id FROM scores WHERE image_id = ?")?;
        let rows = stmt.query_map([image_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?))
        })?;
        for row in rows {
            let (id, model_id) = row?;
            lookup.insert(model_id, id);
        }
    }

    let mut update = tx.prepare_cached(
        "UPDATE scores SET score = ?, is_edited_manually = ?, updated_at = ? WHERE id = ?",
    )?;
    let mut insert = tx.prepare_cached(
        "INSERT INTO scores (image_id, model_id, score, is_edited_manually, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )?;

    for score in scores {
        match lookup.get(&score.model_id) {
            Some(&row_id) => {
                update.execute(params![score.score, score.is_edited_manually, now, row_id])?;
                counts.record(false);
            }
            None => {
                insert.execute(params![
                    image_id,
                    score.model_id,
                    score.score,
                    score.is_edited_manually,
                    now,
                    now
                ])?;
                lookup.insert(score.model_id, tx.last_insert_rowid());
                counts.record(true);
            }
        }
    }
    Ok(counts)
}

fn merge_ratings(
    tx: &Transaction<'_>,
    image_id: i64,
    ratings: &[RatingAnnotation],
    now: &str,
) -> Result<MergeCounts> {
    let mut counts = MergeCounts::default();
    if ratings.is_empty() {
        return Ok(counts);
    }

    let mut lookup: HashMap<i64, i64> = HashMap::new();
    {
        let mut stmt = tx.prepare_cached("SELECT id, model_id FROM ratings WHERE image_id = ?")?;
        let rows = stmt.query_map([image_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (id, model_id) = row?;
            lookup.insert(model_id, id);
        }
    }

    let mut update = tx.prepare_cached(
        "UPDATE ratings SET raw_rating_value = ?, normalized_rating = ?, confidence_score = ?, updated_at = ?
         WHERE id = ?",
    )?;
    let mut insert = tx.prepare_cached(
        "INSERT INTO ratings (image_id, model_id, raw_rating_value, normalized_rating,
                              confidence_score, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;

    for rating in ratings {
        let normalized = rating.normalized_rating.trim();
        match lookup.get(&rating.model_id) {
            Some(&row_id) => {
                update.execute(params![
                    rating.raw_rating_value,
                    normalized,
                    rating.confidence_score,
                    now,
                    row_id
                ])?;
                counts.record(false);
            }
            None => {
                insert.execute(params![
                    image_id,
                    rating.model_id,
                    rating.raw_rating_value,
                    normalized,
                    rating.confidence_score,
                    now,
                    now
                ])?;
                lookup.insert(rating.model_id, tx.last_insert_rowid());
                counts.record(true);
            }
        }
    }
    Ok(counts)
}

pub(crate) fn save_annotations_in(
    tx: &Transaction<'_>,
    image_id: i64,
    annotations: &AnnotationBundle,
) -> Result<MergeSummary> {
    if !image_exists(tx, image_id)? {
        return Err(CurioError::not_found("image", image_id));
    }

    let now = now_timestamp();
    Ok(MergeSummary {
        tags: merge_tags(tx, image_id, &annotations.tags, &now)?,
        captions: merge_captions(tx, image_id, &annotations.captions, &now)?,
        scores: merge_scores(tx, image_id, &annotations.scores, &now)?,
        ratings: merge_ratings(tx, image_id, &annotations.ratings, &now)?,
    })
}

fn load_annotations(conn: &Connection, image_id: i64) -> Result<StoredAnnotations> {
    let mut stored = StoredAnnotations::default();

    let mut stmt = conn.prepare(
        "SELECT id, tag, model_id, confidence_score, existing, is_edited_manually
         FROM tags WHERE image_id = ? ORDER BY id",
    )?;
    for row in stmt.query_map([image_id], |row| {
        Ok(TagRow {
            id: row.get(0)?,
            tag: row.get(1)?,
            model_id: row.get(2)?,
            confidence_score: row.get(3)?,
            existing: row.get(4)?,
            is_edited_manually: row.get(5)?,
        })
    })? {
        stored.tags.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT id, caption, model_id, confidence_score, existing, is_edited_manually
         FROM captions WHERE image_id = ? ORDER BY id",
    )?;
    for row in stmt.query_map([image_id], |row| {
        Ok(CaptionRow {
            id: row.get(0)?,
            caption: row.get(1)?,
            model_id: row.get(2)?,
            confidence_score: row.get(3)?,
            existing: row.get(4)?,
            is_edited_manually: row.get(5)?,
        })
    })? {
        stored.captions.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT id, score, model_id, is_edited_manually FROM scores WHERE image_id = ? ORDER BY id",
    )?;
    for row in stmt.query_map([image_id], |row| {
        Ok(ScoreRow {
            id: row.get(0)?,
            score: row.get(1)?,
            model_id: row.get(2)?,
            is_edited_manually: row.get(3)?,
        })
    })? {
        stored.scores.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT id, model_id, raw_rating_value, normalized_rating, confidence_score
         FROM ratings WHERE image_id = ? ORDER BY id",
    )?;
    for row in stmt.query_map([image_id], |row| {
        Ok(RatingRow {
            id: row.get(0)?,
            model_id: row.get(1)?,
            raw_rating_value: row.get(2)?,
            normalized_rating: row.get(3)?,
            confidence_score: row.get(4)?,
        })
    })? {
        stored.ratings.push(row?);
    }

    Ok(stored)
}

impl Database {
    /// Merge `annotations` into the stored rows of `image_id`.
    ///
    /// Saving the same bundle twice leaves the same set of rows with refreshed
    /// values. Any failure rolls back all four kinds.
    pub fn save_annotations(&self, image_id: i64, annotations: &AnnotationBundle) -> Result<MergeSummary> {
        validate_bundle(annotations)?;

        let summary = self.with_transaction(|tx| save_annotations_in(tx, image_id, annotations))?;
        tracing::debug!(
            image_id,
            tags_inserted = summary.tags.inserted,
            tags_updated = summary.tags.updated,
            captions_inserted = summary.captions.inserted,
            captions_updated = summary.captions.updated,
            scores_inserted = summary.scores.inserted,
            scores_updated = summary.scores.updated,
            ratings_inserted = summary.ratings.inserted,
            ratings_updated = summary.ratings.updated,
            "annotations merged"
        );
        Ok(summary)
    }

    pub fn get_annotations(&self, image_id: i64) -> Result<StoredAnnotations> {
        let conn = self.connect()?;
        load_annotations(&conn, image_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Annotation;
    use crate::db::test_support::{new_image, temp_db};

    fn count_rows(db: &Database, table: &str, image_id: i64) -> i64 {
        let conn = db.connect().unwrap();
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE image_id = ?", table),
            [image_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_same_tag_twice_updates_confidence() {
        let (_dir, db) = temp_db();
        let image_id = db.register_image(&new_image("cat", 512, 512)).unwrap().id();
        let model = db.get_or_create_model("wd-tagger", None, Some("tagger")).unwrap();

        let mut bundle = AnnotationBundle::default();
        bundle.tags.push(TagAnnotation::new("cat", Some(model)).with_confidence(0.6));
        db.save_annotations(image_id, &bundle).unwrap();

        bundle.tags[0].confidence_score = Some(0.9);
        let summary = db.save_annotations(image_id, &bundle).unwrap();
        assert_eq!(summary.tags, MergeCounts { inserted: 0, updated: 1 });

        let stored = db.get_annotations(image_id).unwrap();
        assert_eq!(stored.tags.len(), 1);
        assert_eq!(stored.tags[0].confidence_score, Some(0.9));
    }

    #[test]
    fn test_repeated_entries_in_one_call_collapse() {
        let (_dir, db) = temp_db();
        let image_id = db.register_image(&new_image("dup-tags", 512, 512)).unwrap().id();

        let bundle: AnnotationBundle = vec![
            Annotation::Tag(TagAnnotation::new("1girl", None)),
            Annotation::Tag(TagAnnotation::new(" 1girl ", None).edited(true)),
            Annotation::Caption(CaptionAnnotation::new("a girl", None)),
            Annotation::Caption(CaptionAnnotation::new("a girl", None)),
        ]
        .into_iter()
        .collect();

        let summary = db.save_annotations(image_id, &bundle).unwrap();
        assert_eq!(summary.inserted(), 2);
        assert_eq!(summary.updated(), 2);

        let stored = db.get_annotations(image_id).unwrap();
        assert_eq!(stored.tags.len(), 1);
        assert_eq!(stored.tags[0].is_edited_manually, Some(true));
        assert_eq!(stored.captions.len(), 1);
    }

    #[test]
    fn test_same_text_different_model_is_separate_row() {
        let (_dir, db) = temp_db();
        let image_id = db.register_image(&new_image("models", 512, 512)).unwrap().id();
        let a = db.get_or_create_model("tagger-a", None, None).unwrap();
        let b = db.get_or_create_model("tagger-b", None, None).unwrap();

        let mut bundle = AnnotationBundle::default();
        bundle.tags.push(TagAnnotation::new("sky", Some(a)));
        bundle.tags.push(TagAnnotation::new("sky", Some(b)));
        bundle.tags.push(TagAnnotation::new("sky", None).existing());
        db.save_annotations(image_id, &bundle).unwrap();
        db.save_annotations(image_id, &bundle).unwrap();

        assert_eq!(count_rows(&db, "tags", image_id), 3);
    }

    #[test]
    fn test_scores_and_ratings_keyed_by_model() {
        let (_dir, db) = temp_db();
        let image_id = db.register_image(&new_image("scored", 512, 512)).unwrap().id();
        let scorer = db.get_or_create_model("aesthetic", None, Some("scorer")).unwrap();
        let rater = db.get_or_create_model("rater", None, Some("rater")).unwrap();

        let mut bundle = AnnotationBundle::default();
        bundle.scores.push(ScoreAnnotation::new(5.5, Some(scorer)));
        bundle.ratings.push(RatingAnnotation::new(rater, "general", "PG"));
        db.save_annotations(image_id, &bundle).unwrap();

        bundle.scores[0].score = 7.25;
        bundle.ratings[0] = RatingAnnotation::new(rater, "explicit", "X");
        db.save_annotations(image_id, &bundle).unwrap();

        let stored = db.get_annotations(image_id).unwrap();
        assert_eq!(stored.scores.len(), 1);
        assert_eq!(stored.scores[0].score, 7.25);
        assert_eq!(stored.ratings.len(), 1);
        assert_eq!(stored.ratings[0].normalized_rating, "X");
        assert_eq!(stored.ratings[0].raw_rating_value, "explicit");
    }

    #[test]
    fn test_unknown_image_writes_nothing() {
        let (_dir, db) = temp_db();
        let model = db.get_or_create_model("m", None, None).unwrap();

        let mut bundle = AnnotationBundle::default();
        bundle.tags.push(TagAnnotation::new("cat", Some(model)));
        bundle.captions.push(CaptionAnnotation::new("a cat", Some(model)));
        bundle.scores.push(ScoreAnnotation::new(1.0, Some(model)));
        bundle.ratings.push(RatingAnnotation::new(model, "s", "PG"));

        let err = db.save_annotations(777, &bundle).unwrap_err();
        assert!(matches!(err, CurioError::NotFound { entity: "image", id: 777 }));
        for table in ["tags", "captions", "scores", "ratings"] {
            assert_eq!(count_rows(&db, table, 777), 0, "{} should be empty", table);
        }
    }

    #[test]
    fn test_storage_error_rolls_back_every_kind() {
        let (_dir, db) = temp_db();
        let image_id = db.register_image(&new_image("rollback", 512, 512)).unwrap().id();

        let mut bundle = AnnotationBundle::default();
        bundle.tags.push(TagAnnotation::new("cat", None));
        bundle.captions.push(CaptionAnnotation::new("a cat", None));
        bundle.scores.push(ScoreAnnotation::new(3.0, None));
        // No model 4242: the foreign key fails after the other kinds were written.
        bundle.ratings.push(RatingAnnotation::new(4242, "q", "R"));

        let err = db.save_annotations(image_id, &bundle).unwrap_err();
        assert!(matches!(err, CurioError::Storage(_)));
        for table in ["tags", "captions", "scores", "ratings"] {
            assert_eq!(count_rows(&db, table, image_id), 0, "{} should be empty", table);
        }
    }

    #[test]
    fn test_empty_tag_text_is_rejected() {
        let (_dir, db) = temp_db();
        let image_id = db.register_image(&new_image("blank", 512, 512)).unwrap().id();

        let mut bundle = AnnotationBundle::default();
        bundle.tags.push(TagAnnotation::new("ok", None));
        bundle.tags.push(TagAnnotation::new("   ", None));

        let err = db.save_annotations(image_id, &bundle).unwrap_err();
        assert!(matches!(err, CurioError::Validation(_)));
        assert_eq!(count_rows(&db, "tags", image_id), 0);
    }
}
