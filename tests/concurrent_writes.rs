use curio::db::{AnnotationBundle, Database, ImageRegistration, NewImage, RatingAnnotation, TagAnnotation};
use std::thread;

const WRITERS: usize = 8;
const ROUNDS: usize = 25;

fn image(phash: &str) -> NewImage {
    NewImage {
        phash: phash.to_string(),
        stored_image_path: format!("/data/{phash}.png"),
        width: 640,
        height: 480,
        format: "PNG".to_string(),
        ..Default::default()
    }
}

/// Every writer thread opens its own connections; none of them may fail
/// with a lock error, and racing registrations of one hash resolve to a
/// single row.
#[test]
fn writers_on_separate_threads_do_not_fail() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_initialized(&dir.path().join("curio.db")).unwrap();

    let outcomes: Vec<Vec<i64>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let db = db.clone();
                scope.spawn(move || {
                    let mut shared_ids = Vec::new();
                    for round in 0..ROUNDS {
                        let shared = db.register_image(&image("shared")).unwrap().id();
                        shared_ids.push(shared);

                        let own = db
                            .register_image(&image(&format!("w{writer}-r{round}")))
                            .unwrap();
                        assert!(matches!(own, ImageRegistration::Created(_)));

                        let model = db.get_or_create_model("tagger", Some("local"), None).unwrap();
                        let mut bundle = AnnotationBundle::default();
                        bundle.tags.push(TagAnnotation::new("cat", Some(model)).with_confidence(0.8));
                        bundle.ratings.push(RatingAnnotation::new(model, "safe", "G"));
                        db.save_annotations(shared, &bundle).unwrap();
                        db.save_annotations(own.id(), &bundle).unwrap();
                    }
                    shared_ids
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let shared = outcomes[0][0];
    assert!(outcomes.iter().flatten().all(|id| *id == shared));
    assert_eq!(
        db.get_image_count().unwrap(),
        (1 + WRITERS * ROUNDS) as i64
    );

    let stored = db.get_annotations(shared).unwrap();
    assert_eq!(stored.tags.len(), 1);
    assert_eq!(stored.ratings.len(), 1);
}
