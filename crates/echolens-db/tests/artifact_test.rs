//! Artifact store tests against PostgreSQL.

use echolens_core::{ArtifactRepository, ExtractedTerm, NewTerm, NewVectorSlice};
use echolens_db::test_fixtures::{connect_test, seed_episode, seed_episode_in, test_vector};

const DIM: usize = 1536;

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_insert_terms_skips_existing_podcast_names() {
    let db = connect_test().await;
    let first = seed_episode(&db.pool, "https://cdn.example.com/terms-1.mp3").await;
    let second = seed_episode_in(
        &db.pool,
        Some((first.podcast_id, first.podcast_slug.as_str())),
        "https://cdn.example.com/terms-2.mp3",
    )
    .await;

    let inserted = db
        .artifacts
        .insert_terms(
            &first,
            &[NewTerm {
                term: ExtractedTerm::new("Kubernetes").with_explanation("Container orchestrator"),
                embedding: Some(test_vector(DIM, 0.1)),
            }],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let inserted = db
        .artifacts
        .insert_terms(
            &second,
            &[
                NewTerm {
                    term: ExtractedTerm::new("kubernetes").with_explanation("dup"),
                    embedding: None,
                },
                NewTerm {
                    term: ExtractedTerm::new("Helm")
                        .with_explanation("Package manager")
                        .with_category("technology"),
                    embedding: None,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let names = db
        .artifacts
        .term_names_for_podcast(first.podcast_id)
        .await
        .unwrap();
    assert_eq!(names, vec!["Helm".to_string(), "Kubernetes".to_string()]);

    let terms = db.artifacts.list_terms(second.id).await.unwrap();
    assert_eq!(terms[0].categories, vec!["technology".to_string()]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_copy_then_delete_artifacts() {
    let db = connect_test().await;
    let url = format!("https://cdn.example.com/{}.mp3", uuid::Uuid::now_v7());
    let source = seed_episode(&db.pool, &url).await;
    let target = seed_episode(&db.pool, &url).await;

    db.artifacts
        .save_transcript(source.id, "hello world")
        .await
        .unwrap();
    db.artifacts.save_summary(source.id, "a greeting").await.unwrap();
    db.artifacts
        .insert_slices(
            &source,
            &[NewVectorSlice {
                chunk_index: 0,
                text: "hello world".to_string(),
                embedding: test_vector(DIM, 0.2),
            }],
        )
        .await
        .unwrap();

    let dup = db
        .artifacts
        .find_processed_duplicate(&url, target.id)
        .await
        .unwrap()
        .expect("source has a transcript");
    assert_eq!(dup.id, source.id);

    let copied = db.artifacts.copy_artifacts(&source, &target).await.unwrap();
    assert_eq!(copied.transcripts, 1);
    assert_eq!(copied.summaries, 1);
    assert_eq!(copied.slices, 1);
    assert_eq!(db.artifacts.count_slices(target.id).await.unwrap(), 1);

    // Copy again is a no-op.
    let again = db.artifacts.copy_artifacts(&source, &target).await.unwrap();
    assert_eq!(again.total(), 0);

    let deleted = db.artifacts.delete_artifacts(target.id).await.unwrap();
    assert_eq!(deleted.total(), 3);
    assert!(db.artifacts.get_transcript(target.id).await.unwrap().is_none());
    assert!(db.artifacts.get_transcript(source.id).await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_search_slices_scoped_to_podcast() {
    let db = connect_test().await;
    let episode = seed_episode(&db.pool, "https://cdn.example.com/search.mp3").await;

    db.artifacts
        .insert_slices(
            &episode,
            &[NewVectorSlice {
                chunk_index: 0,
                text: "vector databases".to_string(),
                embedding: test_vector(DIM, 0.5),
            }],
        )
        .await
        .unwrap();

    let hits = db
        .artifacts
        .search_slices(&test_vector(DIM, 0.5), Some(episode.podcast_id), 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].slice.episode_id, episode.id);
    assert!(hits[0].score > 0.99);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_embedding_dimensions_match_schema() {
    let db = connect_test().await;
    let migrated = db.validate_embedding_dimensions(DIM).await.unwrap();
    assert!(migrated.is_empty());
}
