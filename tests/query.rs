use curio::db::{AnnotationBundle, Database, NewImage, TagAnnotation};
use curio::FilterCriteria;
use std::collections::HashSet;
use tempfile::TempDir;

const TAGS: [&str; 4] = ["cat", "dog", "outdoor", "night"];

fn library() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_initialized(&dir.path().join("curio.db")).unwrap();
    (dir, db)
}

/// One image per subset of `TAGS`, tagged with exactly that subset.
fn seed_all_subsets(db: &Database) {
    for mask in 0u32..(1 << TAGS.len()) {
        let id = db
            .register_image(&NewImage {
                phash: format!("phash-{mask}"),
                stored_image_path: format!("/data/{mask}.png"),
                width: 512,
                height: 512,
                format: "PNG".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id();

        let bundle: AnnotationBundle = TAGS
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, tag)| curio::db::Annotation::Tag(TagAnnotation::new(*tag, None)))
            .collect();
        if !bundle.is_empty() {
            db.save_annotations(id, &bundle).unwrap();
        }
    }
}

fn tags_of(db: &Database, image_id: i64) -> HashSet<String> {
    db.get_annotations(image_id)
        .unwrap()
        .tags
        .into_iter()
        .map(|row| row.tag)
        .collect()
}

fn tag_sets() -> Vec<Vec<&'static str>> {
    (1u32..(1 << TAGS.len()))
        .map(|mask| {
            TAGS.iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, tag)| *tag)
                .collect()
        })
        .collect()
}

#[test]
fn and_mode_results_carry_every_tag() {
    let (_dir, db) = library();
    seed_all_subsets(&db);

    for wanted in tag_sets() {
        let (records, count) = db
            .find_images(&FilterCriteria::new().with_tags(wanted.clone()))
            .unwrap();
        assert_eq!(count, records.len());
        // Exactly the supersets of `wanted`.
        assert_eq!(count, 1 << (TAGS.len() - wanted.len()));

        for record in records {
            let tags = tags_of(&db, record.image_id);
            assert!(wanted.iter().all(|t| tags.contains(*t)), "{wanted:?} vs {tags:?}");
        }
    }
}

#[test]
fn or_mode_results_carry_some_tag() {
    let (_dir, db) = library();
    seed_all_subsets(&db);

    for wanted in tag_sets() {
        let (records, count) = db
            .find_images(&FilterCriteria::new().with_tags(wanted.clone()).match_any())
            .unwrap();
        // Everything but the subsets disjoint from `wanted`.
        let total = 1usize << TAGS.len();
        assert_eq!(count, total - (1 << (TAGS.len() - wanted.len())));

        let mut seen = HashSet::new();
        for record in records {
            assert!(seen.insert(record.image_id), "duplicate row for {}", record.image_id);
            let tags = tags_of(&db, record.image_id);
            assert!(wanted.iter().any(|t| tags.contains(*t)), "{wanted:?} vs {tags:?}");
        }
    }
}

#[test]
fn untagged_search_finds_only_the_bare_image() {
    let (_dir, db) = library();
    seed_all_subsets(&db);

    let (records, count) = db
        .find_images(&FilterCriteria::new().untagged_only())
        .unwrap();
    assert_eq!(count, 1);
    assert!(tags_of(&db, records[0].image_id).is_empty());
}

#[test]
fn nsfw_manual_rating_override() {
    let (_dir, db) = library();
    let id = db
        .register_image(&NewImage {
            phash: "r-rated".to_string(),
            stored_image_path: "/data/r.png".to_string(),
            width: 10,
            height: 10,
            format: "PNG".to_string(),
            manual_rating: Some("R".to_string()),
            ..Default::default()
        })
        .unwrap()
        .id();

    let ids = |criteria: FilterCriteria| -> Vec<i64> {
        db.find_images(&criteria)
            .unwrap()
            .0
            .into_iter()
            .map(|r| r.image_id)
            .collect()
    };

    assert!(ids(FilterCriteria::new()).is_empty());
    assert_eq!(ids(FilterCriteria::new().with_nsfw(true)), vec![id]);
    assert_eq!(ids(FilterCriteria::new().with_manual_rating("R")), vec![id]);
}
