//! Image and processed-variant registration, lookups and deletion.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use uuid::Uuid;

use super::models::{Image, ImageRegistration, NewImage, NewProcessedImage, ProcessedImage};
use super::{now_timestamp, Database};
use crate::error::{CurioError, Result};

/// Largest number of ids bound into one `IN (...)` list.
pub(crate) const ID_BATCH_SIZE: usize = 500;

const IMAGE_COLUMNS: &str = "id, uuid, phash, original_image_path, stored_image_path, \
     width, height, format, mode, has_alpha, filename, extension, manual_rating, \
     created_at, updated_at";

const PROCESSED_COLUMNS: &str =
    "id, image_id, stored_image_path, width, height, mode, has_alpha, filename";

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        uuid: row.get(1)?,
        phash: row.get(2)?,
        original_image_path: row.get(3)?,
        stored_image_path: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        format: row.get(7)?,
        mode: row.get(8)?,
        has_alpha: row.get(9)?,
        filename: row.get(10)?,
        extension: row.get(11)?,
        manual_rating: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn processed_from_row(row: &Row<'_>) -> rusqlite::Result<ProcessedImage> {
    Ok(ProcessedImage {
        id: row.get(0)?,
        image_id: row.get(1)?,
        stored_image_path: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        mode: row.get(5)?,
        has_alpha: row.get(6)?,
        filename: row.get(7)?,
    })
}

/// A uniqueness violation on insert, which callers resolve to the existing row.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

fn validate_new_image(image: &NewImage) -> Result<()> {
    if image.phash.trim().is_empty() {
        return Err(CurioError::validation("image is missing phash"));
    }
    if image.stored_image_path.trim().is_empty() {
        return Err(CurioError::validation("image is missing stored_image_path"));
    }
    if image.format.trim().is_empty() {
        return Err(CurioError::validation("image is missing format"));
    }
    if image.width == 0 || image.height == 0 {
        return Err(CurioError::validation(format!(
            "image has invalid dimensions {}x{}",
            image.width, image.height
        )));
    }
    if image.uuid.as_deref().is_some_and(|uuid| uuid.trim().is_empty()) {
        return Err(CurioError::validation("image uuid is empty"));
    }
    Ok(())
}

pub(crate) fn image_exists(conn: &Connection, image_id: i64) -> Result<bool> {
    let exists = conn
        .query_row("SELECT 1 FROM images WHERE id = ?", [image_id], |_| Ok(()))
        .optional()?
        .is_some();
    Ok(exists)
}

fn find_id_by_phash(conn: &Connection, phash: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM images WHERE phash = ?", [phash], |row| row.get(0))
        .optional()?;
    Ok(id)
}

fn find_processed_id(conn: &Connection, image: &NewProcessedImage) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM processed_images WHERE image_id = ? AND width = ? AND height = ? AND filename = ?",
            params![image.image_id, image.width, image.height, image.filename],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn register_image_in(conn: &Connection, image: &NewImage) -> Result<ImageRegistration> {
    let phash = image.phash.trim();
    if let Some(id) = find_id_by_phash(conn, phash)? {
        tracing::debug!(image_id = id, phash, "duplicate image resolved to existing row");
        return Ok(ImageRegistration::Existing(id));
    }

    let uuid = image
        .uuid
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = now_timestamp();
    let inserted = conn.execute(
        r#"
        INSERT INTO images (uuid, phash, original_image_path, stored_image_path,
                            width, height, format, mode, has_alpha, filename, extension,
                            manual_rating, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            uuid,
            phash,
            image.original_image_path,
            image.stored_image_path,
            image.width,
            image.height,
            image.format,
            image.mode,
            image.has_alpha,
            image.filename,
            image.extension,
            image.manual_rating,
            now,
            now,
        ],
    );

    match inserted {
        Ok(_) => Ok(ImageRegistration::Created(conn.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => match find_id_by_phash(conn, phash)? {
            Some(id) => {
                tracing::debug!(image_id = id, phash, "insert conflict resolved to existing row");
                Ok(ImageRegistration::Existing(id))
            }
            None => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

impl Database {
    // ========================================================================
    // Registration
    // ========================================================================

    /// Register an image. A perceptual hash that is already known resolves to
    /// the existing row instead of failing.
    pub fn register_image(&self, image: &NewImage) -> Result<ImageRegistration> {
        validate_new_image(image)?;
        self.with_transaction(|tx| register_image_in(tx, image))
    }

    /// Register a processed variant. An identical `(image, width, height,
    /// filename)` resolves to the existing row.
    pub fn add_processed_image(&self, image: &NewProcessedImage) -> Result<i64> {
        if image.filename.trim().is_empty() || image.stored_image_path.trim().is_empty() {
            return Err(CurioError::validation("processed image is missing filename or path"));
        }
        if image.width == 0 || image.height == 0 {
            return Err(CurioError::validation("processed image has zero dimensions"));
        }

        self.with_transaction(|tx| {
            if !image_exists(tx, image.image_id)? {
                return Err(CurioError::not_found("image", image.image_id));
            }
            if let Some(id) = find_processed_id(tx, image)? {
                return Ok(id);
            }

            let now = now_timestamp();
            let inserted = tx.execute(
                r#"
                INSERT INTO processed_images (image_id, stored_image_path, width, height,
                                              mode, has_alpha, filename, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    image.image_id,
                    image.stored_image_path,
                    image.width,
                    image.height,
                    image.mode,
                    image.has_alpha,
                    image.filename,
                    now,
                    now,
                ],
            );
            match inserted {
                Ok(_) => Ok(tx.last_insert_rowid()),
                Err(e) if is_unique_violation(&e) => {
                    find_processed_id(tx, image)?.ok_or_else(|| CurioError::Storage(e))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_or_create_model(
        &self,
        name: &str,
        provider: Option<&str>,
        model_type: Option<&str>,
    ) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CurioError::validation("model name is empty"));
        }
        self.with_transaction(|tx| {
            let existing: Option<i64> = tx
                .query_row("SELECT id FROM models WHERE name = ?", [name], |row| row.get(0))
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
            tx.execute(
                "INSERT INTO models (name, provider, model_type, created_at) VALUES (?, ?, ?, ?)",
                params![name, provider, model_type, now_timestamp()],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn set_manual_rating(&self, image_id: i64, rating: Option<&str>) -> Result<()> {
        let rating = rating.map(str::trim).filter(|r| !r.is_empty());
        self.with_transaction(|tx| {
            let updated = tx.execute(
                "UPDATE images SET manual_rating = ?, updated_at = ? WHERE id = ?",
                params![rating, now_timestamp(), image_id],
            )?;
            if updated == 0 {
                return Err(CurioError::not_found("image", image_id));
            }
            Ok(())
        })
    }

    /// Delete an image with its processed variants and annotations.
    /// Returns false when the id is unknown.
    pub fn delete_image(&self, image_id: i64) -> Result<bool> {
        self.with_transaction(|tx| {
            let deleted = tx.execute("DELETE FROM images WHERE id = ?", [image_id])?;
            Ok(deleted > 0)
        })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get_image(&self, image_id: i64) -> Result<Option<Image>> {
        let conn = self.connect()?;
        let image = conn
            .query_row(
                &format!("SELECT {} FROM images WHERE id = ?", IMAGE_COLUMNS),
                [image_id],
                image_from_row,
            )
            .optional()?;
        Ok(image)
    }

    pub fn find_image_id_by_phash(&self, phash: &str) -> Result<Option<i64>> {
        let conn = self.connect()?;
        find_id_by_phash(&conn, phash.trim())
    }

    pub fn get_image_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Images for the given ids, fetched in batches.
    pub fn get_images_by_ids(&self, image_ids: &[i64]) -> Result<HashMap<i64, Image>> {
        let conn = self.connect()?;
        images_by_ids(&conn, image_ids)
    }

    /// Processed variants grouped by parent image id, fetched in batches.
    pub fn get_processed_images(&self, image_ids: &[i64]) -> Result<HashMap<i64, Vec<ProcessedImage>>> {
        let conn = self.connect()?;
        processed_by_image_ids(&conn, image_ids)
    }
}

pub(crate) fn images_by_ids(conn: &Connection, image_ids: &[i64]) -> Result<HashMap<i64, Image>> {
    let mut images = HashMap::with_capacity(image_ids.len());
    for chunk in image_ids.chunks(ID_BATCH_SIZE) {
        let query = format!(
            "SELECT {} FROM images WHERE id IN ({})",
            IMAGE_COLUMNS,
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), image_from_row)?;
        for row in rows {
            let image = row?;
            images.insert(image.id, image);
        }
    }
    Ok(images)
}

pub(crate) fn processed_by_image_ids(
    conn: &Connection,
    image_ids: &[i64],
) -> Result<HashMap<i64, Vec<ProcessedImage>>> {
    let mut grouped: HashMap<i64, Vec<ProcessedImage>> = HashMap::new();
    for chunk in image_ids.chunks(ID_BATCH_SIZE) {
        processed_chunk_into(conn, chunk, &mut grouped)?;
    }
    Ok(grouped)
}

pub(crate) fn processed_chunk_into(
    conn: &Connection,
    chunk: &[i64],
    grouped: &mut HashMap<i64, Vec<ProcessedImage>>,
) -> Result<()> {
    let query = format!(
        "SELECT {} FROM processed_images WHERE image_id IN ({}) ORDER BY id",
        PROCESSED_COLUMNS,
        placeholders(chunk.len())
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(chunk.iter()), processed_from_row)?;
    for row in rows {
        let processed = row?;
        grouped.entry(processed.image_id).or_default().push(processed);
    }
    Ok(())
}
