//! Episode artifact repository: transcripts, summaries, terms and vector slices.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use echolens_core::{
    ArtifactCounts, ArtifactRepository, Episode, Error, NewTerm, NewVectorSlice, Result,
    SliceHit, Summary, Term, TermSource, Transcript, Vector, VectorSlice,
};

/// PostgreSQL implementation of ArtifactRepository.
pub struct PgArtifactRepository {
    pool: Pool<Postgres>,
}

impl PgArtifactRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_episode_row(row: sqlx::postgres::PgRow) -> Episode {
        Episode {
            id: row.get("id"),
            podcast_id: row.get("podcast_id"),
            podcast_slug: row.get("podcast_slug"),
            title: row.get("title"),
            audio_url: row.get("audio_url"),
            local_audio_path: row.get("local_audio_path"),
        }
    }

    fn parse_term_row(row: sqlx::postgres::PgRow) -> Result<Term> {
        let source: String = row.get("source");
        Ok(Term {
            id: row.get("id"),
            episode_id: row.get("episode_id"),
            term: row.get("term"),
            context: row.get("context"),
            explanation: row.get("explanation"),
            elaborate_explanation: row.get("elaborate_explanation"),
            categories: row.get("categories"),
            source: source.parse::<TermSource>()?,
            hidden: row.get("hidden"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ArtifactRepository for PgArtifactRepository {
    async fn get_episode(&self, episode_id: Uuid) -> Result<Option<Episode>> {
        let row = sqlx::query(
            "SELECT e.id, e.podcast_id, p.slug AS podcast_slug, e.title, e.audio_url,
                    e.local_audio_path
             FROM episodes e
             JOIN podcasts p ON p.id = e.podcast_id
             WHERE e.id = $1",
        )
        .bind(episode_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_episode_row))
    }

    async fn set_local_audio_path(&self, episode_id: Uuid, path: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE episodes SET local_audio_path = $2 WHERE id = $1")
            .bind(episode_id)
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn get_transcript(&self, episode_id: Uuid) -> Result<Option<Transcript>> {
        let row = sqlx::query(
            "SELECT episode_id, text, created_at FROM transcriptions WHERE episode_id = $1",
        )
        .bind(episode_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| Transcript {
            episode_id: row.get("episode_id"),
            text: row.get("text"),
            created_at: row.get("created_at"),
        }))
    }

    #[instrument(skip(self, text), fields(subsystem = "db", component = "artifacts", op = "save_transcript", text_len = text.len()))]
    async fn save_transcript(&self, episode_id: Uuid, text: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO transcriptions (id, episode_id, text)
             VALUES ($1, $2, $3)
             ON CONFLICT (episode_id) DO UPDATE SET text = EXCLUDED.text",
        )
        .bind(Uuid::now_v7())
        .bind(episode_id)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get_summary(&self, episode_id: Uuid) -> Result<Option<Summary>> {
        let row = sqlx::query(
            "SELECT episode_id, text, audio_path, created_at FROM summaries WHERE episode_id = $1",
        )
        .bind(episode_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| Summary {
            episode_id: row.get("episode_id"),
            text: row.get("text"),
            audio_path: row.get("audio_path"),
            created_at: row.get("created_at"),
        }))
    }

    async fn save_summary(&self, episode_id: Uuid, text: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO summaries (id, episode_id, text)
             VALUES ($1, $2, $3)
             ON CONFLICT (episode_id) DO UPDATE SET text = EXCLUDED.text",
        )
        .bind(Uuid::now_v7())
        .bind(episode_id)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn set_summary_audio(&self, episode_id: Uuid, audio_path: &str) -> Result<()> {
        let result = sqlx::query("UPDATE summaries SET audio_path = $2 WHERE episode_id = $1")
            .bind(episode_id)
            .bind(audio_path)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Summary for episode {}", episode_id)));
        }
        Ok(())
    }

    async fn list_terms(&self, episode_id: Uuid) -> Result<Vec<Term>> {
        let rows = sqlx::query(
            "SELECT id, episode_id, term, context, explanation, elaborate_explanation,
                    categories, source, hidden, created_at
             FROM terms WHERE episode_id = $1
             ORDER BY created_at, id",
        )
        .bind(episode_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_term_row).collect()
    }

    async fn term_names_for_podcast(&self, podcast_id: Uuid) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT t.term
             FROM terms t
             JOIN episodes e ON e.id = t.episode_id
             WHERE e.podcast_id = $1
             ORDER BY t.term",
        )
        .bind(podcast_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(names)
    }

    #[instrument(skip(self, episode, terms), fields(subsystem = "db", component = "artifacts", op = "insert_terms", episode_id = %episode.id, input_count = terms.len()))]
    async fn insert_terms(&self, episode: &Episode, terms: &[NewTerm]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0u64;

        for new_term in terms {
            let term = &new_term.term;
            let result = sqlx::query(
                "INSERT INTO terms (id, episode_id, term, context, explanation, categories,
                                    source, embedding)
                 SELECT $1, $2, $3, $4, $5, $6, 'auto', $7
                 WHERE NOT EXISTS (
                     SELECT 1 FROM terms t
                     JOIN episodes e ON e.id = t.episode_id
                     WHERE e.podcast_id = $8 AND lower(t.term) = lower($3)
                 )",
            )
            .bind(Uuid::now_v7())
            .bind(episode.id)
            .bind(term.term.trim())
            .bind(&term.context)
            .bind(&term.explanation)
            .bind(&term.categories)
            .bind(&new_term.embedding)
            .bind(episode.podcast_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        debug!(inserted, skipped = terms.len() as u64 - inserted, "Stored terms");
        Ok(inserted)
    }

    async fn count_slices(&self, episode_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_slices WHERE episode_id = $1")
                .bind(episode_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }

    #[instrument(skip(self, episode, slices), fields(subsystem = "db", component = "artifacts", op = "insert_slices", episode_id = %episode.id, chunk_count = slices.len()))]
    async fn insert_slices(&self, episode: &Episode, slices: &[NewVectorSlice]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for slice in slices {
            sqlx::query(
                "INSERT INTO vector_slices (id, episode_id, podcast_id, chunk_index, text, embedding)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::now_v7())
            .bind(episode.id)
            .bind(episode.podcast_id)
            .bind(slice.chunk_index)
            .bind(&slice.text)
            .bind(&slice.embedding)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(slices.len() as u64)
    }

    async fn find_processed_duplicate(
        &self,
        audio_url: &str,
        exclude_episode: Uuid,
    ) -> Result<Option<Episode>> {
        let row = sqlx::query(
            "SELECT e.id, e.podcast_id, p.slug AS podcast_slug, e.title, e.audio_url,
                    e.local_audio_path
             FROM episodes e
             JOIN podcasts p ON p.id = e.podcast_id
             JOIN transcriptions t ON t.episode_id = e.id
             WHERE e.audio_url = $1 AND e.id <> $2
             ORDER BY t.created_at ASC
             LIMIT 1",
        )
        .bind(audio_url)
        .bind(exclude_episode)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_episode_row))
    }

    #[instrument(skip(self, from, to), fields(subsystem = "db", component = "artifacts", op = "copy_artifacts", from = %from.id, to = %to.id))]
    async fn copy_artifacts(&self, from: &Episode, to: &Episode) -> Result<ArtifactCounts> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let transcripts = sqlx::query(
            "INSERT INTO transcriptions (id, episode_id, text, embedding)
             SELECT gen_random_uuid(), $2, text, embedding FROM transcriptions WHERE episode_id = $1
             ON CONFLICT (episode_id) DO NOTHING",
        )
        .bind(from.id)
        .bind(to.id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let summaries = sqlx::query(
            "INSERT INTO summaries (id, episode_id, text, audio_path)
             SELECT gen_random_uuid(), $2, text, audio_path FROM summaries WHERE episode_id = $1
             ON CONFLICT (episode_id) DO NOTHING",
        )
        .bind(from.id)
        .bind(to.id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let terms = sqlx::query(
            "INSERT INTO terms (id, episode_id, term, context, explanation, elaborate_explanation,
                                categories, source, hidden, embedding)
             SELECT gen_random_uuid(), $2, term, context, explanation, elaborate_explanation,
                    categories, source, hidden, embedding
             FROM terms WHERE episode_id = $1
               AND NOT EXISTS (SELECT 1 FROM terms WHERE episode_id = $2)",
        )
        .bind(from.id)
        .bind(to.id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let slices = sqlx::query(
            "INSERT INTO vector_slices (id, episode_id, podcast_id, chunk_index, text, embedding)
             SELECT gen_random_uuid(), $2, $3, chunk_index, text, embedding
             FROM vector_slices WHERE episode_id = $1
               AND NOT EXISTS (SELECT 1 FROM vector_slices WHERE episode_id = $2)",
        )
        .bind(from.id)
        .bind(to.id)
        .bind(to.podcast_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        tx.commit().await.map_err(Error::Database)?;

        Ok(ArtifactCounts {
            transcripts,
            summaries,
            terms,
            slices,
        })
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "artifacts", op = "delete_artifacts"))]
    async fn delete_artifacts(&self, episode_id: Uuid) -> Result<ArtifactCounts> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut counts = ArtifactCounts::default();

        for (table, slot) in [
            ("transcriptions", &mut counts.transcripts),
            ("summaries", &mut counts.summaries),
            ("terms", &mut counts.terms),
            ("vector_slices", &mut counts.slices),
        ] {
            *slot = sqlx::query(&format!("DELETE FROM {table} WHERE episode_id = $1"))
                .bind(episode_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?
                .rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(counts)
    }

    async fn search_slices(
        &self,
        embedding: &Vector,
        podcast_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SliceHit>> {
        let rows = sqlx::query(
            "SELECT id, episode_id, podcast_id, chunk_index, text,
                    1.0 - (embedding <=> $1::vector) AS score
             FROM vector_slices
             WHERE ($2::uuid IS NULL OR podcast_id = $2)
             ORDER BY embedding <=> $1::vector
             LIMIT $3",
        )
        .bind(embedding)
        .bind(podcast_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SliceHit {
                slice: VectorSlice {
                    id: row.get("id"),
                    episode_id: row.get("episode_id"),
                    podcast_id: row.get("podcast_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                },
                score: row.get::<f64, _>("score") as f32,
            })
            .collect())
    }
}
