//! Stand-in for the real BitTorrent engine this daemon controls.
//!
//! The engine itself (peer wire protocol, tracker client, piece picker,
//! on-disk storage) is out of scope here; this module gives the rest of
//! the daemon something concrete to compile and test against: a status
//! record, a settings accessor, an alert stream, and one trait tying them
//! together. [`TestEngine`] is a minimal in-memory implementation used by
//! the test suite and the `main.rs` demo entry point. It is not a
//! BitTorrent implementation.

use std::collections::HashMap;

/// 20-byte SHA-1 info hash identifying a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl Default for InfoHash {
    fn default() -> InfoHash {
        InfoHash([0u8; 20])
    }
}

/// The 69 observable fields of a torrent's status, mirrored one-for-one
/// by [`crate::history::TrackedField`]. Field equality is defined pointwise;
/// there is no notion of a "more different" or "less different" status.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentStatus {
    pub info_hash: InfoHash,
    pub state: i64,
    pub paused: bool,
    pub auto_managed: bool,
    pub sequential_download: bool,
    pub is_seeding: bool,
    pub is_finished: bool,
    pub is_loaded: bool,
    pub has_metadata: bool,
    pub progress: f64,
    pub progress_ppm: i64,
    pub error: String,
    pub save_path: String,
    pub name: String,
    pub next_announce: i64,
    pub current_tracker: String,
    pub total_download: i64,
    pub total_upload: i64,
    pub total_payload_download: i64,
    pub total_payload_upload: i64,
    pub total_failed_bytes: i64,
    pub total_redundant_bytes: i64,
    pub download_rate: i64,
    pub upload_rate: i64,
    pub download_payload_rate: i64,
    pub upload_payload_rate: i64,
    pub num_seeds: i64,
    pub num_peers: i64,
    pub num_complete: i64,
    pub num_incomplete: i64,
    pub list_seeds: i64,
    pub list_peers: i64,
    pub connect_candidates: i64,
    pub num_pieces: i64,
    pub total_done: i64,
    pub total_wanted_done: i64,
    pub total_wanted: i64,
    pub distributed_full_copies: i64,
    pub distributed_fraction: i64,
    pub distributed_copies: f64,
    pub block_size: i64,
    pub num_uploads: i64,
    pub num_connections: i64,
    pub uploads_limit: i64,
    pub connections_limit: i64,
    pub storage_mode: i64,
    pub up_bandwidth_queue: i64,
    pub down_bandwidth_queue: i64,
    pub all_time_upload: i64,
    pub all_time_download: i64,
    pub active_time: i64,
    pub finished_time: i64,
    pub seeding_time: i64,
    pub seed_rank: i64,
    pub last_scrape: i64,
    pub has_incoming: bool,
    pub sparse_regions: i64,
    pub seed_mode: bool,
    pub upload_mode: bool,
    pub share_mode: bool,
    pub super_seeding: bool,
    pub priority: i64,
    pub added_time: i64,
    pub completed_time: i64,
    pub last_seen_complete: i64,
    pub time_since_upload: i64,
    pub time_since_download: i64,
    pub queue_position: i64,
    pub need_save_resume: bool,
    pub ip_filter_applies: bool,
}

impl TorrentStatus {
    /// A status carrying only the queried identity, used as the fallback
    /// return value for history lookups that miss.
    pub fn default_for(info_hash: InfoHash) -> TorrentStatus {
        TorrentStatus {
            info_hash,
            state: 0,
            paused: false,
            auto_managed: false,
            sequential_download: false,
            is_seeding: false,
            is_finished: false,
            is_loaded: false,
            has_metadata: false,
            progress: 0.0,
            progress_ppm: 0,
            error: String::new(),
            save_path: String::new(),
            name: String::new(),
            next_announce: 0,
            current_tracker: String::new(),
            total_download: 0,
            total_upload: 0,
            total_payload_download: 0,
            total_payload_upload: 0,
            total_failed_bytes: 0,
            total_redundant_bytes: 0,
            download_rate: 0,
            upload_rate: 0,
            download_payload_rate: 0,
            upload_payload_rate: 0,
            num_seeds: 0,
            num_peers: 0,
            num_complete: 0,
            num_incomplete: 0,
            list_seeds: 0,
            list_peers: 0,
            connect_candidates: 0,
            num_pieces: 0,
            total_done: 0,
            total_wanted_done: 0,
            total_wanted: 0,
            distributed_full_copies: 0,
            distributed_fraction: 0,
            distributed_copies: 0.0,
            block_size: 0,
            num_uploads: 0,
            num_connections: 0,
            uploads_limit: 0,
            connections_limit: 0,
            storage_mode: 0,
            up_bandwidth_queue: 0,
            down_bandwidth_queue: 0,
            all_time_upload: 0,
            all_time_download: 0,
            active_time: 0,
            finished_time: 0,
            seeding_time: 0,
            seed_rank: 0,
            last_scrape: 0,
            has_incoming: false,
            sparse_regions: 0,
            seed_mode: false,
            upload_mode: false,
            share_mode: false,
            super_seeding: false,
            priority: 0,
            added_time: 0,
            completed_time: 0,
            last_seen_complete: 0,
            time_since_upload: 0,
            time_since_download: 0,
            queue_position: 0,
            need_save_resume: false,
            ip_filter_applies: false,
        }
    }
}

/// One tracked field of [`TorrentStatus`], used by the history registry to
/// stamp the frame at which each field last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum TrackedField {
    State,
    Paused,
    AutoManaged,
    SequentialDownload,
    IsSeeding,
    IsFinished,
    IsLoaded,
    HasMetadata,
    Progress,
    ProgressPpm,
    Error,
    SavePath,
    Name,
    NextAnnounce,
    CurrentTracker,
    TotalDownload,
    TotalUpload,
    TotalPayloadDownload,
    TotalPayloadUpload,
    TotalFailedBytes,
    TotalRedundantBytes,
    DownloadRate,
    UploadRate,
    DownloadPayloadRate,
    UploadPayloadRate,
    NumSeeds,
    NumPeers,
    NumComplete,
    NumIncomplete,
    ListSeeds,
    ListPeers,
    ConnectCandidates,
    NumPieces,
    TotalDone,
    TotalWantedDone,
    TotalWanted,
    DistributedFullCopies,
    DistributedFraction,
    DistributedCopies,
    BlockSize,
    NumUploads,
    NumConnections,
    UploadsLimit,
    ConnectionsLimit,
    StorageMode,
    UpBandwidthQueue,
    DownBandwidthQueue,
    AllTimeUpload,
    AllTimeDownload,
    ActiveTime,
    FinishedTime,
    SeedingTime,
    SeedRank,
    LastScrape,
    HasIncoming,
    SparseRegions,
    SeedMode,
    UploadMode,
    ShareMode,
    SuperSeeding,
    Priority,
    AddedTime,
    CompletedTime,
    LastSeenComplete,
    TimeSinceUpload,
    TimeSinceDownload,
    QueuePosition,
    NeedSaveResume,
    IpFilterApplies,
}

impl TrackedField {
    pub const COUNT: usize = 69;

    pub fn all() -> &'static [TrackedField] {
        use TrackedField::*;
        &[
            State,
            Paused,
            AutoManaged,
            SequentialDownload,
            IsSeeding,
            IsFinished,
            IsLoaded,
            HasMetadata,
            Progress,
            ProgressPpm,
            Error,
            SavePath,
            Name,
            NextAnnounce,
            CurrentTracker,
            TotalDownload,
            TotalUpload,
            TotalPayloadDownload,
            TotalPayloadUpload,
            TotalFailedBytes,
            TotalRedundantBytes,
            DownloadRate,
            UploadRate,
            DownloadPayloadRate,
            UploadPayloadRate,
            NumSeeds,
            NumPeers,
            NumComplete,
            NumIncomplete,
            ListSeeds,
            ListPeers,
            ConnectCandidates,
            NumPieces,
            TotalDone,
            TotalWantedDone,
            TotalWanted,
            DistributedFullCopies,
            DistributedFraction,
            DistributedCopies,
            BlockSize,
            NumUploads,
            NumConnections,
            UploadsLimit,
            ConnectionsLimit,
            StorageMode,
            UpBandwidthQueue,
            DownBandwidthQueue,
            AllTimeUpload,
            AllTimeDownload,
            ActiveTime,
            FinishedTime,
            SeedingTime,
            SeedRank,
            LastScrape,
            HasIncoming,
            SparseRegions,
            SeedMode,
            UploadMode,
            ShareMode,
            SuperSeeding,
            Priority,
            AddedTime,
            CompletedTime,
            LastSeenComplete,
            TimeSinceUpload,
            TimeSinceDownload,
            QueuePosition,
            NeedSaveResume,
            IpFilterApplies,
        ]
    }
}

/// Returns every tracked field that differs between `prev` and `next`.
pub fn changed_fields(prev: &TorrentStatus, next: &TorrentStatus) -> Vec<TrackedField> {
    let mut changed = Vec::new();
        if prev.state != next.state { changed.push(TrackedField::State); }
        if prev.paused != next.paused { changed.push(TrackedField::Paused); }
        if prev.auto_managed != next.auto_managed { changed.push(TrackedField::AutoManaged); }
        if prev.sequential_download != next.sequential_download { changed.push(TrackedField::SequentialDownload); }
        if prev.is_seeding != next.is_seeding { changed.push(TrackedField::IsSeeding); }
        if prev.is_finished != next.is_finished { changed.push(TrackedField::IsFinished); }
        if prev.is_loaded != next.is_loaded { changed.push(TrackedField::IsLoaded); }
        if prev.has_metadata != next.has_metadata { changed.push(TrackedField::HasMetadata); }
        if prev.progress != next.progress { changed.push(TrackedField::Progress); }
        if prev.progress_ppm != next.progress_ppm { changed.push(TrackedField::ProgressPpm); }
        if prev.error != next.error { changed.push(TrackedField::Error); }
        if prev.save_path != next.save_path { changed.push(TrackedField::SavePath); }
        if prev.name != next.name { changed.push(TrackedField::Name); }
        if prev.next_announce != next.next_announce { changed.push(TrackedField::NextAnnounce); }
        if prev.current_tracker != next.current_tracker { changed.push(TrackedField::CurrentTracker); }
        if prev.total_download != next.total_download { changed.push(TrackedField::TotalDownload); }
        if prev.total_upload != next.total_upload { changed.push(TrackedField::TotalUpload); }
        if prev.total_payload_download != next.total_payload_download { changed.push(TrackedField::TotalPayloadDownload); }
        if prev.total_payload_upload != next.total_payload_upload { changed.push(TrackedField::TotalPayloadUpload); }
        if prev.total_failed_bytes != next.total_failed_bytes { changed.push(TrackedField::TotalFailedBytes); }
        if prev.total_redundant_bytes != next.total_redundant_bytes { changed.push(TrackedField::TotalRedundantBytes); }
        if prev.download_rate != next.download_rate { changed.push(TrackedField::DownloadRate); }
        if prev.upload_rate != next.upload_rate { changed.push(TrackedField::UploadRate); }
        if prev.download_payload_rate != next.download_payload_rate { changed.push(TrackedField::DownloadPayloadRate); }
        if prev.upload_payload_rate != next.upload_payload_rate { changed.push(TrackedField::UploadPayloadRate); }
        if prev.num_seeds != next.num_seeds { changed.push(TrackedField::NumSeeds); }
        if prev.num_peers != next.num_peers { changed.push(TrackedField::NumPeers); }
        if prev.num_complete != next.num_complete { changed.push(TrackedField::NumComplete); }
        if prev.num_incomplete != next.num_incomplete { changed.push(TrackedField::NumIncomplete); }
        if prev.list_seeds != next.list_seeds { changed.push(TrackedField::ListSeeds); }
        if prev.list_peers != next.list_peers { changed.push(TrackedField::ListPeers); }
        if prev.connect_candidates != next.connect_candidates { changed.push(TrackedField::ConnectCandidates); }
        if prev.num_pieces != next.num_pieces { changed.push(TrackedField::NumPieces); }
        if prev.total_done != next.total_done { changed.push(TrackedField::TotalDone); }
        if prev.total_wanted_done != next.total_wanted_done { changed.push(TrackedField::TotalWantedDone); }
        if prev.total_wanted != next.total_wanted { changed.push(TrackedField::TotalWanted); }
        if prev.distributed_full_copies != next.distributed_full_copies { changed.push(TrackedField::DistributedFullCopies); }
        if prev.distributed_fraction != next.distributed_fraction { changed.push(TrackedField::DistributedFraction); }
        if prev.distributed_copies != next.distributed_copies { changed.push(TrackedField::DistributedCopies); }
        if prev.block_size != next.block_size { changed.push(TrackedField::BlockSize); }
        if prev.num_uploads != next.num_uploads { changed.push(TrackedField::NumUploads); }
        if prev.num_connections != next.num_connections { changed.push(TrackedField::NumConnections); }
        if prev.uploads_limit != next.uploads_limit { changed.push(TrackedField::UploadsLimit); }
        if prev.connections_limit != next.connections_limit { changed.push(TrackedField::ConnectionsLimit); }
        if prev.storage_mode != next.storage_mode { changed.push(TrackedField::StorageMode); }
        if prev.up_bandwidth_queue != next.up_bandwidth_queue { changed.push(TrackedField::UpBandwidthQueue); }
        if prev.down_bandwidth_queue != next.down_bandwidth_queue { changed.push(TrackedField::DownBandwidthQueue); }
        if prev.all_time_upload != next.all_time_upload { changed.push(TrackedField::AllTimeUpload); }
        if prev.all_time_download != next.all_time_download { changed.push(TrackedField::AllTimeDownload); }
        if prev.active_time != next.active_time { changed.push(TrackedField::ActiveTime); }
        if prev.finished_time != next.finished_time { changed.push(TrackedField::FinishedTime); }
        if prev.seeding_time != next.seeding_time { changed.push(TrackedField::SeedingTime); }
        if prev.seed_rank != next.seed_rank { changed.push(TrackedField::SeedRank); }
        if prev.last_scrape != next.last_scrape { changed.push(TrackedField::LastScrape); }
        if prev.has_incoming != next.has_incoming { changed.push(TrackedField::HasIncoming); }
        if prev.sparse_regions != next.sparse_regions { changed.push(TrackedField::SparseRegions); }
        if prev.seed_mode != next.seed_mode { changed.push(TrackedField::SeedMode); }
        if prev.upload_mode != next.upload_mode { changed.push(TrackedField::UploadMode); }
        if prev.share_mode != next.share_mode { changed.push(TrackedField::ShareMode); }
        if prev.super_seeding != next.super_seeding { changed.push(TrackedField::SuperSeeding); }
        if prev.priority != next.priority { changed.push(TrackedField::Priority); }
        if prev.added_time != next.added_time { changed.push(TrackedField::AddedTime); }
        if prev.completed_time != next.completed_time { changed.push(TrackedField::CompletedTime); }
        if prev.last_seen_complete != next.last_seen_complete { changed.push(TrackedField::LastSeenComplete); }
        if prev.time_since_upload != next.time_since_upload { changed.push(TrackedField::TimeSinceUpload); }
        if prev.time_since_download != next.time_since_download { changed.push(TrackedField::TimeSinceDownload); }
        if prev.queue_position != next.queue_position { changed.push(TrackedField::QueuePosition); }
        if prev.need_save_resume != next.need_save_resume { changed.push(TrackedField::NeedSaveResume); }
        if prev.ip_filter_applies != next.ip_filter_applies { changed.push(TrackedField::IpFilterApplies); }
    changed
}

/// The intrinsic type of a named engine setting, used to shape the RPC
/// response payload for `core.get_config_value`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

/// Key/value accessor for engine-level settings. `download_rate_limit` and
/// `upload_rate_limit` are the two settings the compatibility contract in
/// the dispatcher exercises via legacy aliases.
pub trait EngineSettings: Send + Sync {
    fn get(&self, name: &str) -> Option<SettingValue>;
}

/// The four alert kinds a real engine pushes through a channel as torrents
/// change state. The alert ingestion adapter (`alerts`) consumes exactly
/// these.
#[derive(Debug, Clone)]
pub enum Alert {
    Added(TorrentStatus),
    Removed(InfoHash),
    Rename { old_hash: InfoHash, new_hash: InfoHash },
    StateUpdate(Vec<TorrentStatus>),
}

/// Seam between the daemon and the BitTorrent engine. `daemon.info` reads
/// `user_agent`; `core.get_config_value` reads `settings`.
pub trait TorrentEngine: Send + Sync {
    fn user_agent(&self) -> &str;
    fn settings(&self) -> &dyn EngineSettings;
}

/// In-memory settings map backing [`TestEngine`].
#[derive(Debug, Default)]
pub struct MapSettings {
    values: HashMap<String, SettingValue>,
}

impl MapSettings {
    pub fn new() -> MapSettings {
        MapSettings { values: HashMap::new() }
    }

    pub fn with(mut self, name: &str, value: SettingValue) -> MapSettings {
        self.values.insert(name.to_string(), value);
        self
    }
}

impl EngineSettings for MapSettings {
    fn get(&self, name: &str) -> Option<SettingValue> {
        self.values.get(name).cloned()
    }
}

/// Minimal stand-in engine for tests and the demo entry point in
/// `main.rs`. Not a BitTorrent implementation.
pub struct TestEngine {
    user_agent: String,
    settings: MapSettings,
}

impl TestEngine {
    pub fn new(user_agent: impl Into<String>, settings: MapSettings) -> TestEngine {
        TestEngine {
            user_agent: user_agent.into(),
            settings,
        }
    }
}

impl TorrentEngine for TestEngine {
    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn settings(&self) -> &dyn EngineSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_field_count_matches_status_fields() {
        assert_eq!(TrackedField::all().len(), TrackedField::COUNT);
    }

    #[test]
    fn default_for_preserves_queried_hash() {
        let hash = InfoHash([7u8; 20]);
        let status = TorrentStatus::default_for(hash);
        assert_eq!(status.info_hash, hash);
        assert_eq!(status.name, "");
    }

    #[test]
    fn changed_fields_detects_single_field_change() {
        let hash = InfoHash([1u8; 20]);
        let mut a = TorrentStatus::default_for(hash);
        let mut b = a.clone();
        b.progress = 0.5;
        let changed = changed_fields(&a, &b);
        assert_eq!(changed, vec![TrackedField::Progress]);

        a.total_download = 10;
        b.total_download = 20;
        let changed = changed_fields(&a, &b);
        assert!(changed.contains(&TrackedField::TotalDownload));
        assert!(changed.contains(&TrackedField::Progress));
    }

    #[test]
    fn settings_resolves_known_and_unknown_names() {
        let settings = MapSettings::new()
            .with("download_rate_limit", SettingValue::Int(1000))
            .with("upload_rate_limit", SettingValue::Int(500));
        let engine = TestEngine::new("test-agent/1.0", settings);
        assert_eq!(engine.user_agent(), "test-agent/1.0");
        assert!(matches!(
            engine.settings().get("download_rate_limit"),
            Some(SettingValue::Int(1000))
        ));
        assert!(engine.settings().get("nonexistent").is_none());
    }
}
