//!
//! src/persistent.rs  Oct 2026
//!
//! Sqlite store for the mirrored catalog. Doubles as the work queue:
//! the `pending_*` queries compute what still has to be fetched, every
//! write is an idempotent `INSERT OR IGNORE` committed right away.
//!

use std::str::FromStr;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, sqlite::SqliteConnectOptions, Pool, Row, Sqlite};

use crate::errors::CrawlerError;
use crate::types::{
    Artist, ArtistId, Channel, ChannelId, LinkCandidate, TrackId, TrackRow
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Channels,
    Artists,
    Tracks,
    TrackOnChannel,
    ArtistOnChannel,
    ArtistOnTrack,
    TrackLinks,
    TrackLinkAttempts
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Channels          => "channels",
            Table::Artists           => "artists",
            Table::Tracks            => "tracks",
            Table::TrackOnChannel    => "track_on_channel",
            Table::ArtistOnChannel   => "artist_on_channel",
            Table::ArtistOnTrack     => "artist_on_track",
            Table::TrackLinks        => "track_links",
            Table::TrackLinkAttempts => "track_link_attempts"
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub channels: i64,
    pub tracks: i64,
    pub artists: i64,
    pub plays: i64,
    pub channel_artists: i64,
    pub track_artists: i64,
    pub links: i64,
    pub attempts: i64
}

pub struct Persistent {
    pool: Pool<Sqlite>
}

impl Persistent {

    pub async fn init(database_url: &str) -> Result<Self, CrawlerError> {
        let is_memory = database_url.contains(":memory:");

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        // WAL is file-only; a memory db lives and dies with its connection
        if !is_memory {
            opts = opts.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                       .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        let mut pool_opts = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {8});

        if is_memory {
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_opts.connect_with(opts).await?;
        Ok(Self { pool })
    }

    /// Creates every table, safe to run on an existing store
    pub async fn ensure_schema(&self) -> Result<(), CrawlerError> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS channels (
              id          INTEGER NOT NULL PRIMARY KEY,
              key         TEXT,
              name        TEXT,
              description TEXT,
              asset_url   TEXT,
              banner_url  TEXT
            );",
            r"
            CREATE TABLE IF NOT EXISTS artists (
              id          INTEGER NOT NULL PRIMARY KEY,
              slug        TEXT,
              name        TEXT,
              bio_long    TEXT,
              bio_short   TEXT
            );",
            r"
            CREATE TABLE IF NOT EXISTS tracks (
              id            INTEGER NOT NULL PRIMARY KEY,
              track         TEXT,
              title         TEXT,
              length        INTEGER,
              upvotes       INTEGER,
              downvotes     INTEGER,
              artist_id     INTEGER,
              default_image TEXT
            );",
            r"
            CREATE TABLE IF NOT EXISTS track_on_channel (
              channel_id  INTEGER NOT NULL,
              track_id    INTEGER NOT NULL,
              PRIMARY KEY (channel_id, track_id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS artist_on_channel (
              channel_id  INTEGER NOT NULL,
              artist_id   INTEGER NOT NULL,
              PRIMARY KEY (channel_id, artist_id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS artist_on_track (
              track_id    INTEGER NOT NULL,
              artist_id   INTEGER NOT NULL,
              PRIMARY KEY (track_id, artist_id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS track_links (
              track_id    INTEGER NOT NULL,
              link        TEXT NOT NULL,
              PRIMARY KEY (track_id, link)
            );",
            r"
            CREATE TABLE IF NOT EXISTS track_link_attempts (
              id           INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
              track_id     INTEGER NOT NULL,
              attempted_at TEXT NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_toc_track ON track_on_channel(track_id);",
            "CREATE INDEX IF NOT EXISTS idx_attempts_track ON track_link_attempts(track_id);"
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    //
    // Discovery queries, read only
    //

    /// Channels seen playing something but never fetched
    pub async fn pending_channel_ids(&self) -> Result<Vec<ChannelId>, CrawlerError> {
        let ids = sqlx::query_scalar(
            r"
            SELECT DISTINCT toc.channel_id
              FROM track_on_channel toc
              LEFT JOIN channels c ON c.id = toc.channel_id
             WHERE c.id IS NULL
             ORDER BY toc.channel_id;
            "
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Tracks seen playing but never fetched
    pub async fn pending_track_ids(&self) -> Result<Vec<TrackId>, CrawlerError> {
        let ids = sqlx::query_scalar(
            r"
            SELECT DISTINCT toc.track_id
              FROM track_on_channel toc
              LEFT JOIN tracks t ON t.id = toc.track_id
             WHERE t.id IS NULL
             ORDER BY toc.track_id;
            "
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Primary artists of tracks plus artists credited on tracks, not fetched yet
    pub async fn pending_artist_ids(&self) -> Result<Vec<ArtistId>, CrawlerError> {
        let ids = sqlx::query_scalar(
            r"
            SELECT t.artist_id
              FROM tracks t
              LEFT JOIN artists a ON a.id = t.artist_id
             WHERE t.artist_id IS NOT NULL AND a.id IS NULL
            UNION
            SELECT aot.artist_id
              FROM artist_on_track aot
              LEFT JOIN artists a ON a.id = aot.artist_id
             WHERE a.id IS NULL
             ORDER BY 1;
            "
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    const LINK_CANDIDATES: &'static str = r"
        SELECT DISTINCT toc.track_id AS track_id,
               COALESCE(a.name, '') || ' - ' || COALESCE(t.title, '') AS display_name
          FROM track_on_channel toc
          LEFT JOIN tracks t ON t.id = toc.track_id
          LEFT JOIN artists a ON a.id = t.artist_id
         WHERE NOT EXISTS (
               SELECT 1 FROM track_link_attempts tla
                WHERE tla.track_id = toc.track_id)
         ORDER BY toc.track_id";

    /// Played tracks that never had a link search attempted
    pub async fn pending_link_candidates(&self) -> Result<Vec<LinkCandidate>, CrawlerError> {
        let rows = sqlx::query(Self::LINK_CANDIDATES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| LinkCandidate {
            track_id: r.get("track_id"),
            display_name: r.get("display_name")
        }).collect())
    }

    /// Head of `pending_link_candidates`, re-read after every attempt
    pub async fn next_link_candidate(&self) -> Result<Option<LinkCandidate>, CrawlerError> {
        let query = format!("{} LIMIT 1;", Self::LINK_CANDIDATES);
        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| LinkCandidate {
            track_id: r.get("track_id"),
            display_name: r.get("display_name")
        }))
    }

    //
    // Writes, all first-write-wins
    //

    /// Stores a channel and the artists it lists, returns false if already known
    pub async fn insert_channel(&self, id: ChannelId, channel: &Channel) ->
        Result<bool, CrawlerError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO channels VALUES (?1, ?2, ?3, ?4, ?5, ?6);"
        )
        .bind(id)
        .bind(&channel.key)
        .bind(&channel.name)
        .bind(channel.description.as_ref())
        .bind(channel.asset_url.as_ref())
        .bind(channel.banner_url.as_ref())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        for artist_id in channel.artists.iter().filter_map(|a| a.id) {
            sqlx::query("INSERT OR IGNORE INTO artist_on_channel VALUES (?1, ?2);")
                .bind(id)
                .bind(artist_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(inserted > 0)
    }

    /// Stores a track and its credited artists, returns false if already known
    pub async fn insert_track(&self, row: &TrackRow, artist_ids: &[ArtistId]) ->
        Result<bool, CrawlerError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO tracks VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);"
        )
        .bind(row.id)
        .bind(row.track.as_ref())
        .bind(row.title.as_ref())
        .bind(row.length)
        .bind(row.upvotes)
        .bind(row.downvotes)
        .bind(row.artist_id)
        .bind(&row.default_image)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        for artist_id in artist_ids {
            sqlx::query("INSERT OR IGNORE INTO artist_on_track VALUES (?1, ?2);")
                .bind(row.id)
                .bind(artist_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(inserted > 0)
    }

    pub async fn insert_artist(&self, id: ArtistId, artist: &Artist) ->
        Result<bool, CrawlerError> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO artists VALUES (?1, ?2, ?3, ?4, ?5);"
        )
        .bind(id)
        .bind(artist.slug.as_ref())
        .bind(&artist.name)
        .bind(artist.bio_long.as_ref())
        .bind(artist.bio_short.as_ref())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    /// Batch insert of now playing observations (transactional)
    pub async fn insert_plays(&self, plays: &[(ChannelId, TrackId)]) ->
        Result<u64, CrawlerError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for (channel_id, track_id) in plays {
            inserted += sqlx::query("INSERT OR IGNORE INTO track_on_channel VALUES (?1, ?2);")
                .bind(channel_id)
                .bind(track_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Appends to the attempt ledger, committed before the search runs
    pub async fn record_link_attempt(&self, track_id: TrackId) -> Result<i64, CrawlerError> {
        let id = sqlx::query(
            "INSERT INTO track_link_attempts (track_id, attempted_at) VALUES (?1, ?2);"
        )
        .bind(track_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn insert_track_links(&self, track_id: TrackId, links: &[String]) ->
        Result<u64, CrawlerError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for link in links {
            inserted += sqlx::query("INSERT OR IGNORE INTO track_links VALUES (?1, ?2);")
                .bind(track_id)
                .bind(link)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    //
    // Counts
    //

    pub async fn count_rows(&self, table: Table) -> Result<i64, CrawlerError> {
        let query = format!("SELECT COUNT(*) FROM {};", table.as_str());
        let count = sqlx::query_scalar(&query)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn stats(&self) -> Result<StoreStats, CrawlerError> {
        Ok(StoreStats {
            channels: self.count_rows(Table::Channels).await?,
            tracks: self.count_rows(Table::Tracks).await?,
            artists: self.count_rows(Table::Artists).await?,
            plays: self.count_rows(Table::TrackOnChannel).await?,
            channel_artists: self.count_rows(Table::ArtistOnChannel).await?,
            track_artists: self.count_rows(Table::ArtistOnTrack).await?,
            links: self.count_rows(Table::TrackLinks).await?,
            attempts: self.count_rows(Table::TrackLinkAttempts).await?
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
impl Persistent {
    pub async fn get_track(&self, id: TrackId) -> Result<Option<TrackRow>, CrawlerError> {
        let row = sqlx::query(
            r"
            SELECT id, track, title, length, upvotes, downvotes, artist_id, default_image
              FROM tracks WHERE id = ?1;
            "
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| TrackRow {
            id: r.get("id"),
            track: r.try_get("track").ok().flatten(),
            title: r.try_get("title").ok().flatten(),
            length: r.try_get("length").unwrap_or(0),
            upvotes: r.try_get("upvotes").unwrap_or(0),
            downvotes: r.try_get("downvotes").unwrap_or(0),
            artist_id: r.try_get("artist_id").ok().flatten(),
            default_image: r.try_get("default_image").unwrap_or_default()
        }))
    }

    pub async fn track_links(&self, track_id: TrackId) -> Result<Vec<String>, CrawlerError> {
        let links = sqlx::query_scalar(
            "SELECT link FROM track_links WHERE track_id = ?1 ORDER BY link;"
        )
        .bind(track_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{IdRef, Images, Track, Votes};

    pub(crate) async fn memory_store() -> Persistent {
        let db = Persistent::init("sqlite::memory:").await.unwrap();
        db.ensure_schema().await.unwrap();
        db
    }

    fn track_row(id: TrackId, title: &str, artist_id: Option<ArtistId>) -> TrackRow {
        let payload = Track {
            id: Some(id),
            track: Some(format!("src-{id}")),
            title: Some(title.to_string()),
            length: Some(200),
            votes: Votes { up: 1, down: 0 },
            artist: IdRef { id: artist_id },
            images: Images { default: None },
            artists: vec![]
        };
        TrackRow::from_payload(id, &payload)
    }

    fn artist(name: &str) -> Artist {
        Artist {
            id: None,
            slug: Some(name.to_lowercase()),
            name: name.to_string(),
            bio_long: None,
            bio_short: None
        }
    }

    #[tokio::test]
    async fn schema_is_idempotent() -> Result<(), CrawlerError> {
        let db = memory_store().await;
        db.ensure_schema().await?;
        assert_eq!(db.stats().await?, StoreStats::default());
        Ok(())
    }

    #[tokio::test]
    async fn plays_are_unique_per_pair() -> Result<(), CrawlerError> {
        let db = memory_store().await;
        let payload = [(1, 10), (1, 11), (2, 10)];

        assert_eq!(db.insert_plays(&payload).await?, 3);
        assert_eq!(db.insert_plays(&payload).await?, 0);
        assert_eq!(db.count_rows(Table::TrackOnChannel).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn pending_channels_and_tracks_shrink_as_rows_arrive() -> Result<(), CrawlerError> {
        let db = memory_store().await;
        db.insert_plays(&[(1, 10), (1, 11), (2, 10)]).await?;

        assert_eq!(db.pending_channel_ids().await?, vec![1, 2]);
        assert_eq!(db.pending_track_ids().await?, vec![10, 11]);

        let channel = Channel {
            id: Some(1),
            key: "trance".into(),
            name: "Trance".into(),
            description: None,
            asset_url: None,
            banner_url: None,
            artists: vec![IdRef { id: Some(100) }, IdRef { id: None }]
        };
        assert!(db.insert_channel(1, &channel).await?);
        assert!(!db.insert_channel(1, &channel).await?);
        assert_eq!(db.count_rows(Table::ArtistOnChannel).await?, 1);

        db.insert_track(&track_row(10, "Song", None), &[]).await?;

        assert_eq!(db.pending_channel_ids().await?, vec![2]);
        assert_eq!(db.pending_track_ids().await?, vec![11]);
        Ok(())
    }

    #[tokio::test]
    async fn pending_artists_union_is_deduplicated() -> Result<(), CrawlerError> {
        let db = memory_store().await;
        db.insert_track(&track_row(10, "A", Some(7)), &[7, 8]).await?;
        db.insert_track(&track_row(11, "B", Some(7)), &[9]).await?;
        db.insert_track(&track_row(12, "C", None), &[]).await?;

        assert_eq!(db.pending_artist_ids().await?, vec![7, 8, 9]);

        db.insert_artist(8, &artist("Eight")).await?;
        assert_eq!(db.pending_artist_ids().await?, vec![7, 9]);
        Ok(())
    }

    #[tokio::test]
    async fn first_write_wins() -> Result<(), CrawlerError> {
        let db = memory_store().await;
        assert!(db.insert_track(&track_row(10, "Original", Some(1)), &[1]).await?);
        assert!(!db.insert_track(&track_row(10, "Renamed", Some(2)), &[2]).await?);

        let stored = db.get_track(10).await?.unwrap();
        assert_eq!(stored.title.as_deref(), Some("Original"));
        assert_eq!(stored.artist_id, Some(1));
        assert_eq!(db.count_rows(Table::Tracks).await?, 1);
        // association rows are still unioned in
        assert_eq!(db.count_rows(Table::ArtistOnTrack).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn link_candidates_use_partial_names_and_skip_attempted() -> Result<(), CrawlerError> {
        let db = memory_store().await;
        db.insert_plays(&[(1, 10), (2, 10), (1, 11), (1, 12)]).await?;
        db.insert_track(&track_row(10, "Song", Some(7)), &[]).await?;
        db.insert_track(&track_row(11, "Lonely", Some(8)), &[]).await?;
        db.insert_artist(7, &artist("Seven")).await?;

        let candidates = db.pending_link_candidates().await?;
        assert_eq!(candidates, vec![
            LinkCandidate { track_id: 10, display_name: "Seven - Song".into() },
            LinkCandidate { track_id: 11, display_name: " - Lonely".into() },
            LinkCandidate { track_id: 12, display_name: " - ".into() },
        ]);

        db.record_link_attempt(10).await?;
        let next = db.next_link_candidate().await?.unwrap();
        assert_eq!(next.track_id, 11);
        assert_eq!(db.pending_link_candidates().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn track_links_are_unique() -> Result<(), CrawlerError> {
        let db = memory_store().await;
        let links = vec![
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            "https://youtu.be/dQw4w9WgXcQ".to_string(),
        ];
        assert_eq!(db.insert_track_links(10, &links).await?, 2);
        assert_eq!(db.insert_track_links(10, &links).await?, 0);
        assert_eq!(db.track_links(10).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn writes_are_durable_across_reopen() -> Result<(), CrawlerError> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite:{}", dir.path().join("di-fm.db").display());

        let db = Persistent::init(&url).await?;
        db.ensure_schema().await?;
        db.insert_plays(&[(3, 30)]).await?;
        db.record_link_attempt(30).await?;
        db.close().await;

        let reopened = Persistent::init(&url).await?;
        assert_eq!(reopened.pending_track_ids().await?, vec![30]);
        assert!(reopened.pending_link_candidates().await?.is_empty());
        Ok(())
    }
}
