//! Command Bodies
//!
//! Every built-in command is a plain function with the [`CommandFn`]
//! signature. Arity has already been checked by the dispatcher, so bodies
//! index `args` directly; `args[0]` is the command name.
//!
//! ### String Commands
//! - `SET key value [EX seconds | PX milliseconds] [NX | XX] [KEEPTTL]`
//! - `GET`, `GETSET`, `SETNX`, `SETEX`, `APPEND`, `STRLEN`
//! - `INCR`, `DECR`, `INCRBY`, `DECRBY`
//!
//! ### List Commands
//! - `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LRANGE`
//!
//! ### Key Commands
//! - `DEL`, `EXISTS`, `EXPIRE`, `PEXPIRE`, `TTL`, `PTTL`, `PERSIST`, `TYPE`, `KEYS`
//!
//! ### Server Commands
//! - `PING`, `ECHO`, `DBSIZE`, `FLUSHDB`, `INFO`, `QUIT`

use std::collections::VecDeque;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use crate::protocol::RespValue;
use crate::storage::{Object, Ttl, Value};

use super::table::{wrong_arity, Arity, Command, CommandContext, CommandFn};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const OVERFLOW: &str = "ERR increment or decrement would overflow";

pub(crate) fn builtin_commands() -> Vec<Command> {
    let command = |name, arity, handler: CommandFn| Command {
        name,
        arity,
        handler,
    };

    vec![
        // Server
        command("ping", Arity::AtLeast(1), cmd_ping),
        command("echo", Arity::Exact(2), cmd_echo),
        command("dbsize", Arity::Exact(1), cmd_dbsize),
        command("flushdb", Arity::Exact(1), cmd_flushdb),
        command("info", Arity::AtLeast(1), cmd_info),
        command("quit", Arity::Exact(1), cmd_quit),
        // Strings
        command("get", Arity::Exact(2), cmd_get),
        command("set", Arity::AtLeast(3), cmd_set),
        command("setnx", Arity::Exact(3), cmd_setnx),
        command("setex", Arity::Exact(4), cmd_setex),
        command("getset", Arity::Exact(3), cmd_getset),
        command("append", Arity::Exact(3), cmd_append),
        command("strlen", Arity::Exact(2), cmd_strlen),
        command("incr", Arity::Exact(2), cmd_incr),
        command("decr", Arity::Exact(2), cmd_decr),
        command("incrby", Arity::Exact(3), cmd_incrby),
        command("decrby", Arity::Exact(3), cmd_decrby),
        // Keys
        command("del", Arity::AtLeast(2), cmd_del),
        command("exists", Arity::AtLeast(2), cmd_exists),
        command("expire", Arity::Exact(3), cmd_expire),
        command("pexpire", Arity::Exact(3), cmd_pexpire),
        command("ttl", Arity::Exact(2), cmd_ttl),
        command("pttl", Arity::Exact(2), cmd_pttl),
        command("persist", Arity::Exact(2), cmd_persist),
        command("type", Arity::Exact(2), cmd_type),
        command("keys", Arity::Exact(2), cmd_keys),
        // Lists
        command("lpush", Arity::AtLeast(3), cmd_lpush),
        command("rpush", Arity::AtLeast(3), cmd_rpush),
        command("lpop", Arity::Exact(2), cmd_lpop),
        command("rpop", Arity::Exact(2), cmd_rpop),
        command("llen", Arity::Exact(2), cmd_llen),
        command("lrange", Arity::Exact(4), cmd_lrange),
    ]
}

// ============================================================================
// Helper functions
// ============================================================================

fn parse_integer(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn bulk_or_null(value: Option<Bytes>) -> RespValue {
    match value {
        Some(v) => RespValue::bulk_string(v),
        None => RespValue::null(),
    }
}

/// Reads a string key. `Err` carries the WRONGTYPE reply.
fn read_string(ctx: &mut CommandContext<'_>, key: &[u8]) -> Result<Option<Bytes>, RespValue> {
    match ctx.keyspace.lookup_read(key).as_deref() {
        None => Ok(None),
        Some(Value::Str(data)) => Ok(Some(data.clone())),
        Some(Value::List(_)) => Err(RespValue::error(WRONGTYPE)),
    }
}

/// Absolute unix-ms deadline `amount * unit_ms` from now.
fn deadline_after(ctx: &CommandContext<'_>, amount: i64, unit_ms: i64) -> Option<i64> {
    amount
        .checked_mul(unit_ms)
        .and_then(|ms| ms.checked_add(ctx.keyspace.now_ms()))
}

// ============================================================================
// Server Commands
// ============================================================================

/// PING [message]
fn cmd_ping(_ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match args.len() {
        1 => RespValue::pong(),
        2 => RespValue::bulk_string(args[1].clone()),
        _ => wrong_arity("ping"),
    }
}

/// ECHO message
fn cmd_echo(_ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    RespValue::bulk_string(args[1].clone())
}

/// DBSIZE
fn cmd_dbsize(ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> RespValue {
    RespValue::integer(ctx.keyspace.len() as i64)
}

/// FLUSHDB
fn cmd_flushdb(ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> RespValue {
    ctx.keyspace.flush();
    RespValue::ok()
}

/// QUIT
fn cmd_quit(ctx: &mut CommandContext<'_>, _args: &[Bytes]) -> RespValue {
    ctx.quit = true;
    RespValue::ok()
}

/// INFO [section]
fn cmd_info(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let stats = ctx.stats;
    let keyspace = ctx.keyspace.stats();

    let sections = [
        (
            "server",
            format!(
                "# Server\r\n\
                 emberkv_version:{}\r\n\
                 os:{}\r\n\
                 process_id:{}\r\n\
                 uptime_in_seconds:{}\r\n",
                crate::VERSION,
                std::env::consts::OS,
                std::process::id(),
                stats.uptime().as_secs(),
            ),
        ),
        (
            "clients",
            format!(
                "# Clients\r\n\
                 connected_clients:{}\r\n",
                stats.connected_clients,
            ),
        ),
        (
            "stats",
            format!(
                "# Stats\r\n\
                 total_connections_received:{}\r\n\
                 rejected_connections:{}\r\n\
                 total_commands_processed:{}\r\n\
                 total_net_input_bytes:{}\r\n\
                 total_net_output_bytes:{}\r\n\
                 expired_keys:{}\r\n\
                 keyspace_hits:{}\r\n\
                 keyspace_misses:{}\r\n",
                stats.connections_accepted,
                stats.connections_rejected,
                stats.commands_processed,
                stats.bytes_read,
                stats.bytes_written,
                keyspace.expired_keys,
                keyspace.keyspace_hits,
                keyspace.keyspace_misses,
            ),
        ),
        (
            "keyspace",
            format!(
                "# Keyspace\r\n\
                 db0:keys={},expires={}\r\n",
                ctx.keyspace.len(),
                ctx.keyspace.expires(),
            ),
        ),
    ];

    let wanted = args.get(1).map(|s| s.to_ascii_lowercase());
    let info = sections
        .iter()
        .filter(|(name, _)| match wanted.as_deref() {
            None | Some(b"all") | Some(b"default") => true,
            Some(section) => section == name.as_bytes(),
        })
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join("\r\n");

    RespValue::bulk_string(Bytes::from(info))
}

// ============================================================================
// String Commands
// ============================================================================

/// GET key
fn cmd_get(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match read_string(ctx, &args[1]) {
        Ok(value) => bulk_or_null(value),
        Err(reply) => reply,
    }
}

/// SET key value [EX seconds | PX milliseconds] [NX | XX] [KEEPTTL]
fn cmd_set(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let key = args[1].clone();
    let value = args[2].clone();

    let mut deadline: Option<i64> = None;
    let mut nx = false;
    let mut xx = false;
    let mut keep_ttl = false;

    let mut i = 3;
    while i < args.len() {
        let opt = args[i].to_ascii_uppercase();
        match &opt[..] {
            b"EX" | b"PX" => {
                let Some(amount) = args.get(i + 1) else {
                    return RespValue::error("ERR syntax error");
                };
                let Some(amount) = parse_integer(amount) else {
                    return RespValue::error(NOT_INTEGER);
                };
                let unit = if &opt[..] == b"EX" { 1000 } else { 1 };
                match deadline_after(ctx, amount, unit) {
                    Some(at) if amount > 0 => deadline = Some(at),
                    _ => return RespValue::error("ERR invalid expire time in 'set' command"),
                }
                i += 1;
            }
            b"NX" => nx = true,
            b"XX" => xx = true,
            b"KEEPTTL" => keep_ttl = true,
            _ => return RespValue::error("ERR syntax error"),
        }
        i += 1;
    }

    if (nx && xx) || (keep_ttl && deadline.is_some()) {
        return RespValue::error("ERR syntax error");
    }

    if nx || xx {
        let exists = ctx.keyspace.exists(&key);
        if (nx && exists) || (xx && !exists) {
            return RespValue::null();
        }
    }

    if keep_ttl {
        ctx.keyspace.update(key, Value::string(value));
    } else {
        ctx.keyspace.set(key.clone(), Value::string(value));
        if let Some(at) = deadline {
            ctx.keyspace.set_expire(&key, at);
        }
    }
    RespValue::ok()
}

/// SETNX key value
fn cmd_setnx(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let added = ctx
        .keyspace
        .add(args[1].clone(), Value::string(args[2].clone()));
    RespValue::integer(added as i64)
}

/// SETEX key seconds value
fn cmd_setex(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let Some(seconds) = parse_integer(&args[2]) else {
        return RespValue::error(NOT_INTEGER);
    };
    let deadline = match deadline_after(ctx, seconds, 1000) {
        Some(at) if seconds > 0 => at,
        _ => return RespValue::error("ERR invalid expire time in 'setex' command"),
    };

    let key = args[1].clone();
    ctx.keyspace.set(key.clone(), Value::string(args[3].clone()));
    ctx.keyspace.set_expire(&key, deadline);
    RespValue::ok()
}

/// GETSET key value
fn cmd_getset(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let old = match read_string(ctx, &args[1]) {
        Ok(old) => old,
        Err(reply) => return reply,
    };
    ctx.keyspace
        .set(args[1].clone(), Value::string(args[2].clone()));
    bulk_or_null(old)
}

/// APPEND key value
fn cmd_append(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let key = &args[1];
    let suffix = &args[2];

    let current = match ctx.keyspace.lookup_write(key).as_deref() {
        None => None,
        Some(Value::Str(data)) => Some(data.clone()),
        Some(Value::List(_)) => return RespValue::error(WRONGTYPE),
    };

    match current {
        None => {
            ctx.keyspace.set(key.clone(), Value::string(suffix.clone()));
            RespValue::integer(suffix.len() as i64)
        }
        Some(data) => {
            let mut joined = BytesMut::with_capacity(data.len() + suffix.len());
            joined.extend_from_slice(&data);
            joined.extend_from_slice(suffix);
            let len = joined.len();
            ctx.keyspace
                .update(key.clone(), Value::string(joined.freeze()));
            RespValue::integer(len as i64)
        }
    }
}

/// STRLEN key
fn cmd_strlen(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match read_string(ctx, &args[1]) {
        Ok(value) => RespValue::integer(value.map_or(0, |v| v.len()) as i64),
        Err(reply) => reply,
    }
}

/// Shared body of INCR, DECR, INCRBY and DECRBY. The TTL is kept.
fn incr_by(ctx: &mut CommandContext<'_>, key: &Bytes, delta: i64) -> RespValue {
    let current = match ctx.keyspace.lookup_write(key).as_deref() {
        None => 0,
        Some(value @ Value::Str(_)) => match value.as_integer() {
            Some(n) => n,
            None => return RespValue::error(NOT_INTEGER),
        },
        Some(Value::List(_)) => return RespValue::error(WRONGTYPE),
    };

    let Some(next) = current.checked_add(delta) else {
        return RespValue::error(OVERFLOW);
    };
    ctx.keyspace.update(key.clone(), Value::integer(next));
    RespValue::integer(next)
}

/// INCR key
fn cmd_incr(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    incr_by(ctx, &args[1], 1)
}

/// DECR key
fn cmd_decr(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    incr_by(ctx, &args[1], -1)
}

/// INCRBY key increment
fn cmd_incrby(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match parse_integer(&args[2]) {
        Some(delta) => incr_by(ctx, &args[1], delta),
        None => RespValue::error(NOT_INTEGER),
    }
}

/// DECRBY key decrement
fn cmd_decrby(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match parse_integer(&args[2]) {
        Some(delta) => match delta.checked_neg() {
            Some(delta) => incr_by(ctx, &args[1], delta),
            None => RespValue::error(OVERFLOW),
        },
        None => RespValue::error(NOT_INTEGER),
    }
}

// ============================================================================
// Key Commands
// ============================================================================

/// DEL key [key ...]
fn cmd_del(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let deleted = args[1..]
        .iter()
        .filter(|key| ctx.keyspace.exists(key) && ctx.keyspace.delete(key))
        .count();
    RespValue::integer(deleted as i64)
}

/// EXISTS key [key ...]
fn cmd_exists(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let count = args[1..]
        .iter()
        .filter(|key| ctx.keyspace.exists(key))
        .count();
    RespValue::integer(count as i64)
}

fn expire_generic(ctx: &mut CommandContext<'_>, args: &[Bytes], unit_ms: i64) -> RespValue {
    let Some(amount) = parse_integer(&args[2]) else {
        return RespValue::error(NOT_INTEGER);
    };
    let Some(deadline) = deadline_after(ctx, amount, unit_ms) else {
        return RespValue::error(NOT_INTEGER);
    };

    // A deadline at or before now deletes the key.
    let applied = ctx.keyspace.set_expire(&args[1], deadline);
    RespValue::integer(applied as i64)
}

/// EXPIRE key seconds
fn cmd_expire(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    expire_generic(ctx, args, 1000)
}

/// PEXPIRE key milliseconds
fn cmd_pexpire(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    expire_generic(ctx, args, 1)
}

/// TTL key
fn cmd_ttl(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match ctx.keyspace.ttl_ms(&args[1]) {
        Ttl::Missing => RespValue::integer(-2),
        Ttl::Persistent => RespValue::integer(-1),
        Ttl::Remaining(ms) => RespValue::integer((ms + 500) / 1000),
    }
}

/// PTTL key
fn cmd_pttl(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match ctx.keyspace.ttl_ms(&args[1]) {
        Ttl::Missing => RespValue::integer(-2),
        Ttl::Persistent => RespValue::integer(-1),
        Ttl::Remaining(ms) => RespValue::integer(ms),
    }
}

/// PERSIST key
fn cmd_persist(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    RespValue::integer(ctx.keyspace.persist(&args[1]) as i64)
}

/// TYPE key
fn cmd_type(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let name = ctx
        .keyspace
        .lookup_read(&args[1])
        .map_or("none", |value| value.type_name());
    RespValue::simple_string(name)
}

/// KEYS pattern
fn cmd_keys(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let keys = ctx.keyspace.keys(&args[1]);
    RespValue::array(keys.into_iter().map(RespValue::bulk_string).collect())
}

// ============================================================================
// List Commands
// ============================================================================

fn push_generic(ctx: &mut CommandContext<'_>, args: &[Bytes], front: bool) -> RespValue {
    let push = |items: &mut VecDeque<Bytes>| {
        for value in &args[2..] {
            if front {
                items.push_front(value.clone());
            } else {
                items.push_back(value.clone());
            }
        }
        items.len()
    };

    let len = match ctx.keyspace.lookup_mut(&args[1]) {
        Some(object) => match Rc::make_mut(object) {
            Value::List(items) => push(items),
            Value::Str(_) => return RespValue::error(WRONGTYPE),
        },
        None => {
            let mut items = VecDeque::with_capacity(args.len() - 2);
            let len = push(&mut items);
            let list: Object = Rc::new(Value::List(items));
            ctx.keyspace.set(args[1].clone(), list);
            len
        }
    };
    RespValue::integer(len as i64)
}

/// LPUSH key value [value ...]
fn cmd_lpush(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    push_generic(ctx, args, true)
}

/// RPUSH key value [value ...]
fn cmd_rpush(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    push_generic(ctx, args, false)
}

fn pop_generic(ctx: &mut CommandContext<'_>, args: &[Bytes], front: bool) -> RespValue {
    let key = &args[1];
    let (popped, now_empty) = match ctx.keyspace.lookup_mut(key) {
        None => return RespValue::null(),
        Some(object) => match Rc::make_mut(object) {
            Value::List(items) => {
                let popped = if front {
                    items.pop_front()
                } else {
                    items.pop_back()
                };
                (popped, items.is_empty())
            }
            Value::Str(_) => return RespValue::error(WRONGTYPE),
        },
    };

    // Empty lists do not exist.
    if now_empty {
        ctx.keyspace.delete(key);
    }
    bulk_or_null(popped)
}

/// LPOP key
fn cmd_lpop(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    pop_generic(ctx, args, true)
}

/// RPOP key
fn cmd_rpop(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    pop_generic(ctx, args, false)
}

/// LLEN key
fn cmd_llen(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    match ctx.keyspace.lookup_read(&args[1]).as_deref() {
        None => RespValue::integer(0),
        Some(Value::List(items)) => RespValue::integer(items.len() as i64),
        Some(Value::Str(_)) => RespValue::error(WRONGTYPE),
    }
}

/// LRANGE key start stop
fn cmd_lrange(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
    let (Some(start), Some(stop)) = (parse_integer(&args[2]), parse_integer(&args[3])) else {
        return RespValue::error(NOT_INTEGER);
    };

    let object = match ctx.keyspace.lookup_read(&args[1]) {
        None => return RespValue::array(vec![]),
        Some(object) => object,
    };
    let Some(items) = object.as_list() else {
        return RespValue::error(WRONGTYPE);
    };

    let len = items.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return RespValue::array(vec![]);
    }

    let values = items
        .range(start as usize..=stop as usize)
        .cloned()
        .map(RespValue::bulk_string)
        .collect();
    RespValue::array(values)
}
