//! RPC method dispatch: validates a decoded envelope against the per-method
//! structural schema, routes to a handler, and produces the `[tag, req_id,
//! payload]` response envelope, matching the `deluge::incoming_rpc`
//! dispatch table's method names and schemas, generalized with a couple of
//! history-facing methods the legacy wire format has no room to express
//! (namespaced `core.*` so they never collide with the bit-compatible
//! surface).

use std::collections::HashMap;

use crate::engine::{SettingValue, TorrentEngine, TrackedField};
use crate::history::History;
use crate::rencode::{parse_schema, skip_item, validate, Encoder, Kind, Term, Token};

/// Handlers are given both the whole sub-envelope's tokens (absolute to
/// `tokens`) and the byte buffer strings borrow from, plus the index of the
/// args list token and the kwargs dict token. They write their response
/// payload list directly into `enc`.
type HandlerFn =
    fn(&Context, &[Token], &[u8], usize, usize, &mut Encoder) -> Result<(), &'static str>;

pub struct Context<'a> {
    pub engine: &'a dyn TorrentEngine,
    pub history: &'a History,
}

struct MethodSpec {
    args: Term,
    kwargs: Term,
    handler: HandlerFn,
}

/// Registry mapping method name to its schema and handler. Built once at
/// server startup and shared read-only across every connection.
pub struct Dispatcher {
    methods: HashMap<&'static str, MethodSpec>,
    envelope: Term,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        let mut methods = HashMap::new();
        methods.insert(
            "daemon.login",
            MethodSpec { args: parse_schema("[ss]"), kwargs: parse_schema("{}"), handler: handle_login },
        );
        methods.insert(
            "daemon.set_event_interest",
            MethodSpec {
                args: parse_schema("[[s]]"),
                kwargs: parse_schema("{}"),
                handler: handle_set_event_interest,
            },
        );
        methods.insert(
            "daemon.info",
            MethodSpec { args: parse_schema("[]"), kwargs: parse_schema("{}"), handler: handle_info },
        );
        methods.insert(
            "core.get_config_value",
            MethodSpec {
                args: parse_schema("[s]"),
                kwargs: parse_schema("{}"),
                handler: handle_get_config_value,
            },
        );
        methods.insert(
            "core.get_torrents_status",
            MethodSpec {
                args: parse_schema("[i]"),
                kwargs: parse_schema("{}"),
                handler: handle_get_torrents_status,
            },
        );
        methods.insert(
            "core.get_torrents_status_diff",
            MethodSpec {
                args: parse_schema("[i]"),
                kwargs: parse_schema("{}"),
                handler: handle_get_torrents_status_diff,
            },
        );
        Dispatcher { methods, envelope: parse_schema("[is[]{}]") }
    }

    /// Dispatches one decoded message, which may be a single envelope or a
    /// batch (an outer list whose first element is itself a list). Returns
    /// one encoded rencode document per request handled; each is written to
    /// the wire as its own compressed frame.
    pub fn dispatch(&self, ctx: &Context, tokens: &[Token], buf: &[u8]) -> Vec<Vec<u8>> {
        if tokens.is_empty() {
            return vec![error_envelope(-1, "malformed envelope")];
        }
        let is_batch = tokens[0].kind == Kind::List
            && tokens.len() > 1
            && tokens[1].kind == Kind::List;
        if is_batch {
            let mut out = Vec::new();
            let mut idx = 1;
            for _ in 0..tokens[0].num_items {
                let end = skip_item(tokens, idx);
                out.push(self.dispatch_one(ctx, &tokens[idx..end], buf));
                idx = end;
            }
            out
        } else {
            vec![self.dispatch_one(ctx, tokens, buf)]
        }
    }

    fn dispatch_one(&self, ctx: &Context, tokens: &[Token], buf: &[u8]) -> Vec<u8> {
        if validate(tokens, 0, &self.envelope).map(|end| end == tokens.len()) != Some(true) {
            let req_id = malformed_req_id(tokens);
            return error_envelope(req_id, "malformed envelope");
        }
        let req_id = tokens[1].int_value;
        let method = String::from_utf8_lossy(tokens[2].string(buf)).into_owned();
        let args_idx = 3;
        let kwargs_idx = skip_item(tokens, args_idx);

        let Some(spec) = self.methods.get(method.as_str()) else {
            return error_envelope(req_id, "unknown method");
        };
        let args_ok = validate(tokens, args_idx, &spec.args).map(|e| e == kwargs_idx) == Some(true);
        let kwargs_end = skip_item(tokens, kwargs_idx);
        let kwargs_ok =
            validate(tokens, kwargs_idx, &spec.kwargs).map(|e| e == kwargs_end) == Some(true);
        if !args_ok || !kwargs_ok {
            return error_envelope(req_id, "invalid arguments");
        }

        let mut enc = Encoder::new();
        enc.append_list(3);
        enc.append_int(1); // tag: response
        enc.append_int(req_id);
        match (spec.handler)(ctx, tokens, buf, args_idx, kwargs_idx, &mut enc) {
            Ok(()) => enc.data().to_vec(),
            Err(msg) => error_envelope(req_id, msg),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Dispatcher {
        Dispatcher::new()
    }
}

/// `req_id` is reported as the integer id token if present; a non-integer
/// (or missing) id is reported as `-1`, which is ambiguous against a
/// legitimately-chosen id of `-1` — see `DESIGN.md`.
fn malformed_req_id(tokens: &[Token]) -> i64 {
    match tokens.get(1) {
        Some(t) if t.kind == Kind::Int => t.int_value,
        _ => -1,
    }
}

fn error_envelope(req_id: i64, exception_name: &str) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.append_list(3);
    enc.append_int(2); // tag: error
    enc.append_int(req_id);
    enc.append_list(3);
    enc.append_string(exception_name.as_bytes());
    enc.append_string(b"");
    enc.append_string(b"");
    enc.data().to_vec()
}

fn handle_login(
    _ctx: &Context,
    _tokens: &[Token],
    _buf: &[u8],
    _args_idx: usize,
    _kwargs_idx: usize,
    enc: &mut Encoder,
) -> Result<(), &'static str> {
    enc.append_list(1);
    enc.append_int(5); // constant auth level, matching the legacy client contract
    Ok(())
}

fn handle_set_event_interest(
    _ctx: &Context,
    _tokens: &[Token],
    _buf: &[u8],
    _args_idx: usize,
    _kwargs_idx: usize,
    enc: &mut Encoder,
) -> Result<(), &'static str> {
    enc.append_list(1);
    enc.append_bool(true);
    Ok(())
}

fn handle_info(
    ctx: &Context,
    _tokens: &[Token],
    _buf: &[u8],
    _args_idx: usize,
    _kwargs_idx: usize,
    enc: &mut Encoder,
) -> Result<(), &'static str> {
    enc.append_list(1);
    enc.append_string(ctx.engine.user_agent().as_bytes());
    Ok(())
}

/// `max_download_speed`/`max_upload_speed` are legacy aliases resolved
/// before lookup, matching the compatibility contract.
fn resolve_setting_alias(name: &str) -> &str {
    match name {
        "max_download_speed" => "download_rate_limit",
        "max_upload_speed" => "upload_rate_limit",
        other => other,
    }
}

fn handle_get_config_value(
    ctx: &Context,
    tokens: &[Token],
    buf: &[u8],
    args_idx: usize,
    _kwargs_idx: usize,
    enc: &mut Encoder,
) -> Result<(), &'static str> {
    let name_tok = &tokens[args_idx + 1];
    let name = String::from_utf8_lossy(name_tok.string(buf)).into_owned();
    let resolved = resolve_setting_alias(&name);
    match ctx.engine.settings().get(resolved) {
        Some(SettingValue::Str(s)) => {
            enc.append_list(1);
            enc.append_string(s.as_bytes());
            Ok(())
        }
        Some(SettingValue::Int(i)) => {
            enc.append_list(1);
            enc.append_int(i);
            Ok(())
        }
        Some(SettingValue::Bool(b)) => {
            enc.append_list(1);
            enc.append_bool(b);
            Ok(())
        }
        None => Err("unknown configuration"),
    }
}

/// One dict entry per `TorrentStatus` field, plus `info_hash`, matching the
/// field list enumerated in `engine::TrackedField`.
const STATUS_DICT_FIELDS: usize = TrackedField::COUNT + 1;

fn encode_status(enc: &mut Encoder, status: &crate::engine::TorrentStatus) {
    enc.append_dict(STATUS_DICT_FIELDS);
    enc.append_string(b"info_hash");
    enc.append_string(&status.info_hash.0);

    macro_rules! field_int {
        ($name:literal, $field:ident) => {
            enc.append_string($name.as_bytes());
            enc.append_int(status.$field);
        };
    }
    macro_rules! field_bool {
        ($name:literal, $field:ident) => {
            enc.append_string($name.as_bytes());
            enc.append_bool(status.$field);
        };
    }
    macro_rules! field_str {
        ($name:literal, $field:ident) => {
            enc.append_string($name.as_bytes());
            enc.append_string(status.$field.as_bytes());
        };
    }
    macro_rules! field_float {
        ($name:literal, $field:ident) => {
            enc.append_string($name.as_bytes());
            enc.append_float(status.$field);
        };
    }

    field_int!("state", state);
    field_bool!("paused", paused);
    field_bool!("auto_managed", auto_managed);
    field_bool!("sequential_download", sequential_download);
    field_bool!("is_seeding", is_seeding);
    field_bool!("is_finished", is_finished);
    field_bool!("is_loaded", is_loaded);
    field_bool!("has_metadata", has_metadata);
    field_float!("progress", progress);
    field_int!("progress_ppm", progress_ppm);
    field_str!("error", error);
    field_str!("save_path", save_path);
    field_str!("name", name);
    field_int!("next_announce", next_announce);
    field_str!("current_tracker", current_tracker);
    field_int!("total_download", total_download);
    field_int!("total_upload", total_upload);
    field_int!("total_payload_download", total_payload_download);
    field_int!("total_payload_upload", total_payload_upload);
    field_int!("total_failed_bytes", total_failed_bytes);
    field_int!("total_redundant_bytes", total_redundant_bytes);
    field_int!("download_rate", download_rate);
    field_int!("upload_rate", upload_rate);
    field_int!("download_payload_rate", download_payload_rate);
    field_int!("upload_payload_rate", upload_payload_rate);
    field_int!("num_seeds", num_seeds);
    field_int!("num_peers", num_peers);
    field_int!("num_complete", num_complete);
    field_int!("num_incomplete", num_incomplete);
    field_int!("list_seeds", list_seeds);
    field_int!("list_peers", list_peers);
    field_int!("connect_candidates", connect_candidates);
    field_int!("num_pieces", num_pieces);
    field_int!("total_done", total_done);
    field_int!("total_wanted_done", total_wanted_done);
    field_int!("total_wanted", total_wanted);
    field_int!("distributed_full_copies", distributed_full_copies);
    field_int!("distributed_fraction", distributed_fraction);
    field_float!("distributed_copies", distributed_copies);
    field_int!("block_size", block_size);
    field_int!("num_uploads", num_uploads);
    field_int!("num_connections", num_connections);
    field_int!("uploads_limit", uploads_limit);
    field_int!("connections_limit", connections_limit);
    field_int!("storage_mode", storage_mode);
    field_int!("up_bandwidth_queue", up_bandwidth_queue);
    field_int!("down_bandwidth_queue", down_bandwidth_queue);
    field_int!("all_time_upload", all_time_upload);
    field_int!("all_time_download", all_time_download);
    field_int!("active_time", active_time);
    field_int!("finished_time", finished_time);
    field_int!("seeding_time", seeding_time);
    field_int!("seed_rank", seed_rank);
    field_int!("last_scrape", last_scrape);
    field_bool!("has_incoming", has_incoming);
    field_int!("sparse_regions", sparse_regions);
    field_bool!("seed_mode", seed_mode);
    field_bool!("upload_mode", upload_mode);
    field_bool!("share_mode", share_mode);
    field_bool!("super_seeding", super_seeding);
    field_int!("priority", priority);
    field_int!("added_time", added_time);
    field_int!("completed_time", completed_time);
    field_int!("last_seen_complete", last_seen_complete);
    field_int!("time_since_upload", time_since_upload);
    field_int!("time_since_download", time_since_download);
    field_int!("queue_position", queue_position);
    field_bool!("need_save_resume", need_save_resume);
    field_bool!("ip_filter_applies", ip_filter_applies);
}

fn handle_get_torrents_status(
    ctx: &Context,
    tokens: &[Token],
    _buf: &[u8],
    args_idx: usize,
    _kwargs_idx: usize,
    enc: &mut Encoder,
) -> Result<(), &'static str> {
    let frame = tokens[args_idx + 1].int_value.max(0) as u64;
    let statuses = ctx.history.updated_since(frame);
    enc.append_list(1);
    enc.append_list(statuses.len());
    for status in &statuses {
        encode_status(enc, status);
    }
    Ok(())
}

fn handle_get_torrents_status_diff(
    ctx: &Context,
    tokens: &[Token],
    _buf: &[u8],
    args_idx: usize,
    _kwargs_idx: usize,
    enc: &mut Encoder,
) -> Result<(), &'static str> {
    let frame = tokens[args_idx + 1].int_value.max(0) as u64;
    let new_frame = ctx.history.frame();
    let statuses = ctx.history.updated_since(frame);
    let removed = ctx.history.removed_since(frame);

    enc.append_list(3);
    enc.append_int(new_frame as i64);
    enc.append_list(statuses.len());
    for status in &statuses {
        encode_status(enc, status);
    }
    enc.append_list(removed.len());
    for hash in &removed {
        enc.append_string(hash.to_hex().as_bytes());
    }
    Ok(())
}
