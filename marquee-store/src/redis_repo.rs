use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::collections::HashMap;
use tracing::debug;

use marquee_core::{
    BookingId, Lock, LockId, LockTable, LockTableError, SeatClaim, SeatId, SessionId, ShowtimeId,
};

// Key layout:
//   marquee:lock:{lock}              hash  state, session, showtime, expires_ms, closed_ms, body
//   marquee:showtime:{id}:seats      hash  seat -> "held:{lock}" | "booked:{booking}"
//   marquee:showtime:{id}:locks      set   lock ids of the showtime
//   marquee:locks:active             zset  ACTIVE lock ids scored by expires_ms
//   marquee:locks:closed             zset  terminal lock ids scored by closed_ms
//
// Every script takes `now` from the caller. Key TTLs are only a backstop for
// locks orphaned by a crashed process.
const PRELUDE: &str = r#"
local LOCK_PREFIX = 'marquee:lock:'
local ACTIVE = 'marquee:locks:active'
local CLOSED = 'marquee:locks:closed'

local function seats_key(showtime) return 'marquee:showtime:' .. showtime .. ':seats' end
local function locks_key(showtime) return 'marquee:showtime:' .. showtime .. ':locks' end

local function holds(lock_id, now)
  local h = redis.call('HMGET', LOCK_PREFIX .. lock_id, 'state', 'expires_ms')
  if h[1] == 'CONFIRMING' then return true end
  return h[1] == 'ACTIVE' and tonumber(h[2]) >= now
end

local function taken(value, now)
  if not value then return false end
  local kind, ref = string.match(value, '^(%a+):(.+)$')
  if kind == 'booked' then return true end
  return holds(ref, now)
end

local function save(key, body, ...)
  local encoded = cjson.encode(body)
  redis.call('HSET', key, 'body', encoded, ...)
  return encoded
end

local function close_lock(lock_id, state, now, now_iso)
  local key = LOCK_PREFIX .. lock_id
  local h = redis.call('HMGET', key, 'showtime', 'body')
  local body = cjson.decode(h[2])
  body.state = state
  body.closedAt = now_iso
  local skey = seats_key(h[1])
  for _, s in ipairs(body.seats) do
    if redis.call('HGET', skey, s.showtimeSeatId) == 'held:' .. lock_id then
      redis.call('HDEL', skey, s.showtimeSeatId)
    end
  end
  redis.call('ZREM', ACTIVE, lock_id)
  redis.call('ZADD', CLOSED, now, lock_id)
  return save(key, body, 'state', state, 'closed_ms', now)
end

-- Shared guard for calls that need a live ACTIVE lock.
local function live_or_error(key, lock_id, now, now_iso)
  local h = redis.call('HMGET', key, 'state', 'expires_ms')
  local state = h[1]
  if not state or state == 'RELEASED' then return nil, {'not_found'} end
  if state == 'EXPIRED' then return nil, {'expired'} end
  if state == 'CONFIRMING' or state == 'CONSUMED' then return nil, {'already_consumed'} end
  if now > tonumber(h[2]) then
    close_lock(lock_id, 'EXPIRED', now, now_iso)
    return nil, {'expired'}
  end
  return cjson.decode(redis.call('HGET', key, 'body')), nil
end
"#;

// KEYS[1] lock key; ARGV lock, session, showtime, now, now_iso, expires_ms, body, backstop_ms, seats...
const CLAIM: &str = r#"
local lock_id, session, showtime = ARGV[1], ARGV[2], ARGV[3]
local now, now_iso = tonumber(ARGV[4]), ARGV[5]
local skey, lkey = seats_key(showtime), locks_key(showtime)

for _, other in ipairs(redis.call('SMEMBERS', lkey)) do
  local owner = redis.call('HGET', LOCK_PREFIX .. other, 'session')
  if not owner then
    redis.call('SREM', lkey, other)
  elseif owner == session and holds(other, now) then
    return {'busy', other}
  end
end

local conflicts = {}
for i = 9, #ARGV do
  if taken(redis.call('HGET', skey, ARGV[i]), now) then
    table.insert(conflicts, ARGV[i])
  end
end
if #conflicts > 0 then
  table.insert(conflicts, 1, 'conflict')
  return conflicts
end

for i = 9, #ARGV do
  local current = redis.call('HGET', skey, ARGV[i])
  if current then
    local stale = string.match(current, '^held:(.+)$')
    if stale and redis.call('HGET', LOCK_PREFIX .. stale, 'state') == 'ACTIVE' then
      close_lock(stale, 'EXPIRED', now, now_iso)
    end
  end
  redis.call('HSET', skey, ARGV[i], 'held:' .. lock_id)
end

redis.call('HSET', KEYS[1], 'state', 'ACTIVE', 'session', session, 'showtime', showtime,
  'expires_ms', ARGV[6], 'body', ARGV[7])
redis.call('PEXPIREAT', KEYS[1], ARGV[8])
redis.call('SADD', lkey, lock_id)
redis.call('ZADD', ACTIVE, ARGV[6], lock_id)
return {'ok'}
"#;

// KEYS[1] lock key; ARGV lock, now, now_iso
const RELEASE: &str = r#"
local lock_id, now, now_iso = ARGV[1], tonumber(ARGV[2]), ARGV[3]
local state = redis.call('HGET', KEYS[1], 'state')
if state == 'CONFIRMING' then return {'already_consumed'} end
if state ~= 'ACTIVE' then return {'not_found'} end
local _, err = live_or_error(KEYS[1], lock_id, now, now_iso)
if err then return err end
return {'ok', close_lock(lock_id, 'RELEASED', now, now_iso)}
"#;

// KEYS[1] lock key; ARGV lock, now, now_iso, expires_ms, expires_iso, backstop_ms
const EXTEND: &str = r#"
local lock_id, now, now_iso = ARGV[1], tonumber(ARGV[2]), ARGV[3]
local body, err = live_or_error(KEYS[1], lock_id, now, now_iso)
if err then return err end
body.expiresAt = ARGV[5]
local encoded = save(KEYS[1], body, 'expires_ms', ARGV[4])
redis.call('ZADD', ACTIVE, ARGV[4], lock_id)
redis.call('PEXPIREAT', KEYS[1], ARGV[6])
return {'ok', encoded}
"#;

// KEYS[1] lock key; ARGV lock, now, now_iso
const BEGIN_CONSUME: &str = r#"
local lock_id, now, now_iso = ARGV[1], tonumber(ARGV[2]), ARGV[3]
local body, err = live_or_error(KEYS[1], lock_id, now, now_iso)
if err then return err end
body.state = 'CONFIRMING'
local encoded = save(KEYS[1], body, 'state', 'CONFIRMING')
redis.call('ZREM', ACTIVE, lock_id)
return {'ok', encoded}
"#;

// KEYS[1] lock key; ARGV lock, booking, now, now_iso
const COMPLETE_CONSUME: &str = r#"
local lock_id, booking = ARGV[1], ARGV[2]
local h = redis.call('HMGET', KEYS[1], 'state', 'showtime', 'body')
if not h[1] then return {'not_found'} end
if h[1] ~= 'CONFIRMING' then return {'already_consumed'} end
local body = cjson.decode(h[3])
body.state = 'CONSUMED'
body.closedAt = ARGV[4]
body.bookingId = booking
local skey = seats_key(h[2])
for _, s in ipairs(body.seats) do
  redis.call('HSET', skey, s.showtimeSeatId, 'booked:' .. booking)
end
redis.call('ZADD', CLOSED, ARGV[3], lock_id)
return {'ok', save(KEYS[1], body, 'state', 'CONSUMED', 'closed_ms', ARGV[3])}
"#;

// KEYS[1] lock key; ARGV lock
const ABORT_CONSUME: &str = r#"
local h = redis.call('HMGET', KEYS[1], 'state', 'expires_ms', 'body')
if h[1] ~= 'CONFIRMING' then return {'not_found'} end
local body = cjson.decode(h[3])
body.state = 'ACTIVE'
save(KEYS[1], body, 'state', 'ACTIVE')
redis.call('ZADD', ACTIVE, h[2], ARGV[1])
return {'ok'}
"#;

// ARGV now, now_iso, collect_before_ms
const SWEEP: &str = r#"
local now, now_iso = tonumber(ARGV[1]), ARGV[2]
local expired = {}
for _, id in ipairs(redis.call('ZRANGEBYSCORE', ACTIVE, '-inf', '(' .. ARGV[1])) do
  if redis.call('HGET', LOCK_PREFIX .. id, 'state') == 'ACTIVE' then
    table.insert(expired, close_lock(id, 'EXPIRED', now, now_iso))
  else
    redis.call('ZREM', ACTIVE, id)
  end
end
for _, id in ipairs(redis.call('ZRANGEBYSCORE', CLOSED, '-inf', '(' .. ARGV[3])) do
  local showtime = redis.call('HGET', LOCK_PREFIX .. id, 'showtime')
  if showtime then redis.call('SREM', locks_key(showtime), id) end
  redis.call('DEL', LOCK_PREFIX .. id)
  redis.call('ZREM', CLOSED, id)
end
return expired
"#;

// ARGV showtime, session, now
const ACTIVE_FOR_SESSION: &str = r#"
local now = tonumber(ARGV[3])
for _, id in ipairs(redis.call('SMEMBERS', locks_key(ARGV[1]))) do
  local h = redis.call('HMGET', LOCK_PREFIX .. id, 'state', 'session', 'expires_ms', 'body')
  if h[1] == 'ACTIVE' and h[2] == ARGV[2] and tonumber(h[3]) >= now then
    return h[4]
  end
end
return false
"#;

// ARGV showtime, now. Flat groups of: seat, kind, ref, session, expires_ms
const CLAIMS: &str = r#"
local now = tonumber(ARGV[2])
local out = {}
local all = redis.call('HGETALL', seats_key(ARGV[1]))
for i = 1, #all, 2 do
  local seat = all[i]
  local kind, ref = string.match(all[i + 1], '^(%a+):(.+)$')
  if kind == 'booked' then
    for _, v in ipairs({seat, kind, ref, '', '0'}) do table.insert(out, v) end
  elseif kind == 'held' and holds(ref, now) then
    local h = redis.call('HMGET', LOCK_PREFIX .. ref, 'session', 'expires_ms')
    for _, v in ipairs({seat, kind, ref, h[1], h[2]}) do table.insert(out, v) end
  end
end
return out
"#;

// KEYS[1] seats key; ARGV booking, seats...
const UNBOOK: &str = r#"
local tag = 'booked:' .. ARGV[1]
for i = 2, #ARGV do
  if redis.call('HGET', KEYS[1], ARGV[i]) == tag then
    redis.call('HDEL', KEYS[1], ARGV[i])
  end
end
return 1
"#;

struct Scripts {
    claim: Script,
    release: Script,
    extend: Script,
    begin_consume: Script,
    complete_consume: Script,
    abort_consume: Script,
    sweep: Script,
    active_for_session: Script,
    claims: Script,
    unbook: Script,
}

impl Scripts {
    fn load() -> Self {
        let with_prelude = |body: &str| Script::new(&format!("{}{}", PRELUDE, body));
        Self {
            claim: with_prelude(CLAIM),
            release: with_prelude(RELEASE),
            extend: with_prelude(EXTEND),
            begin_consume: with_prelude(BEGIN_CONSUME),
            complete_consume: with_prelude(COMPLETE_CONSUME),
            abort_consume: with_prelude(ABORT_CONSUME),
            sweep: with_prelude(SWEEP),
            active_for_session: with_prelude(ACTIVE_FOR_SESSION),
            claims: with_prelude(CLAIMS),
            unbook: Script::new(UNBOOK),
        }
    }
}

/// Lock table shared by every API instance through a single Redis node.
///
/// Each operation is one Lua script, so Redis serializes them exactly like
/// the per-showtime mutex does in the in-process table.
pub struct RedisLockTable {
    client: redis::Client,
    /// How long a lock key outlives its deadline if nothing collects it.
    backstop: chrono::Duration,
    scripts: Scripts,
}

fn storage(e: redis::RedisError) -> LockTableError {
    LockTableError::Storage(e.to_string())
}

fn lock_key(lock_id: LockId) -> String {
    format!("marquee:lock:{}", lock_id)
}

fn seats_key(showtime_id: ShowtimeId) -> String {
    format!("marquee:showtime:{}:seats", showtime_id)
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_lock(body: &str) -> Result<Lock, LockTableError> {
    serde_json::from_str(body).map_err(|e| LockTableError::Storage(format!("corrupt lock record: {}", e)))
}

/// Maps a script's `{status, payload?}` reply to the payload or an error.
fn outcome(lock_id: LockId, reply: Vec<String>) -> Result<Option<String>, LockTableError> {
    let mut parts = reply.into_iter();
    match parts.next().as_deref() {
        Some("ok") => Ok(parts.next()),
        Some("not_found") => Err(LockTableError::NotFound(lock_id)),
        Some("expired") => Err(LockTableError::Expired(lock_id)),
        Some("already_consumed") => Err(LockTableError::AlreadyConsumed(lock_id)),
        other => Err(LockTableError::Storage(format!("unexpected script reply: {:?}", other))),
    }
}

fn outcome_lock(lock_id: LockId, reply: Vec<String>) -> Result<Lock, LockTableError> {
    match outcome(lock_id, reply)? {
        Some(body) => parse_lock(&body),
        None => Err(LockTableError::Storage("script returned no lock".to_string())),
    }
}

fn parse_id<T: std::str::FromStr>(raw: &str) -> Result<T, LockTableError> {
    raw.parse::<T>()
        .map_err(|_| LockTableError::Storage(format!("bad id in lock table: {}", raw)))
}

fn claim_outcome(reply: Vec<String>) -> Result<(), LockTableError> {
    let mut parts = reply.into_iter();
    match parts.next().as_deref() {
        Some("ok") => Ok(()),
        Some("busy") => {
            let holder = parts
                .next()
                .ok_or_else(|| LockTableError::Storage("busy reply without lock id".to_string()))?;
            Err(LockTableError::SessionBusy(parse_id(&holder)?))
        }
        Some("conflict") => {
            let seats = parts.map(|s| parse_id(&s)).collect::<Result<Vec<SeatId>, _>>()?;
            Err(LockTableError::Conflict { seats })
        }
        other => Err(LockTableError::Storage(format!("unexpected claim reply: {:?}", other))),
    }
}

fn parse_claims(flat: Vec<String>) -> Result<HashMap<SeatId, SeatClaim>, LockTableError> {
    if flat.len() % 5 != 0 {
        return Err(LockTableError::Storage(format!("claims reply of odd length {}", flat.len())));
    }
    let mut claims = HashMap::with_capacity(flat.len() / 5);
    for group in flat.chunks(5) {
        let seat_id: SeatId = parse_id(&group[0])?;
        let claim = match group[1].as_str() {
            "booked" => SeatClaim::Booked { booking_id: parse_id(&group[2])? },
            "held" => {
                let millis: i64 = parse_id(&group[4])?;
                SeatClaim::Held {
                    lock_id: parse_id(&group[2])?,
                    session_id: parse_id::<SessionId>(&group[3])?,
                    expires_at: DateTime::from_timestamp_millis(millis)
                        .ok_or_else(|| LockTableError::Storage(format!("bad expiry: {}", millis)))?,
                }
            }
            other => return Err(LockTableError::Storage(format!("unknown claim kind: {}", other))),
        };
        claims.insert(seat_id, claim);
    }
    Ok(claims)
}

impl RedisLockTable {
    pub async fn new(connection_string: &str, backstop: chrono::Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        // Fail at startup rather than on the first request.
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self {
            client,
            backstop,
            scripts: Scripts::load(),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, LockTableError> {
        self.client.get_multiplexed_async_connection().await.map_err(storage)
    }

    fn backstop_ms(&self, expires_at: DateTime<Utc>) -> i64 {
        (expires_at + self.backstop).timestamp_millis()
    }
}

#[async_trait]
impl LockTable for RedisLockTable {
    async fn try_claim(&self, lock: &Lock) -> Result<(), LockTableError> {
        let mut conn = self.conn().await?;
        let body = serde_json::to_string(lock).map_err(|e| LockTableError::Storage(e.to_string()))?;
        let seats: Vec<String> = lock.seat_ids().iter().map(|s| s.to_string()).collect();

        let mut invocation = self.scripts.claim.key(lock_key(lock.id));
        invocation
            .arg(lock.id.to_string())
            .arg(lock.session_id.to_string())
            .arg(lock.showtime_id.to_string())
            .arg(lock.created_at.timestamp_millis())
            .arg(iso(lock.created_at))
            .arg(lock.expires_at.timestamp_millis())
            .arg(body)
            .arg(self.backstop_ms(lock.expires_at))
            .arg(seats);
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(storage)?;
        claim_outcome(reply)
    }

    async fn get(&self, lock_id: LockId) -> Result<Option<Lock>, LockTableError> {
        let mut conn = self.conn().await?;
        let body: Option<String> = redis::cmd("HGET")
            .arg(lock_key(lock_id))
            .arg("body")
            .query_async(&mut conn)
            .await
            .map_err(storage)?;
        body.as_deref().map(parse_lock).transpose()
    }

    async fn release(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let mut conn = self.conn().await?;
        let reply: Vec<String> = self
            .scripts
            .release
            .key(lock_key(lock_id))
            .arg(lock_id.to_string())
            .arg(now.timestamp_millis())
            .arg(iso(now))
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        outcome_lock(lock_id, reply)
    }

    async fn extend(&self, lock_id: LockId, ttl: chrono::Duration, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let mut conn = self.conn().await?;
        let expires_at = now + ttl;
        let reply: Vec<String> = self
            .scripts
            .extend
            .key(lock_key(lock_id))
            .arg(lock_id.to_string())
            .arg(now.timestamp_millis())
            .arg(iso(now))
            .arg(expires_at.timestamp_millis())
            .arg(iso(expires_at))
            .arg(self.backstop_ms(expires_at))
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        outcome_lock(lock_id, reply)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>, grace: chrono::Duration) -> Result<Vec<Lock>, LockTableError> {
        let mut conn = self.conn().await?;
        let bodies: Vec<String> = self
            .scripts
            .sweep
            .arg(now.timestamp_millis())
            .arg(iso(now))
            .arg((now - grace).timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        if !bodies.is_empty() {
            debug!(expired = bodies.len(), "Redis sweep expired locks");
        }
        bodies.iter().map(|b| parse_lock(b)).collect()
    }

    async fn active_for_session(
        &self,
        showtime_id: ShowtimeId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lock>, LockTableError> {
        let mut conn = self.conn().await?;
        let body: Option<String> = self
            .scripts
            .active_for_session
            .arg(showtime_id.to_string())
            .arg(session_id.to_string())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        body.as_deref().map(parse_lock).transpose()
    }

    async fn claims(&self, showtime_id: ShowtimeId, now: DateTime<Utc>) -> Result<HashMap<SeatId, SeatClaim>, LockTableError> {
        let mut conn = self.conn().await?;
        let flat: Vec<String> = self
            .scripts
            .claims
            .arg(showtime_id.to_string())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        parse_claims(flat)
    }

    async fn begin_consume(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let mut conn = self.conn().await?;
        let reply: Vec<String> = self
            .scripts
            .begin_consume
            .key(lock_key(lock_id))
            .arg(lock_id.to_string())
            .arg(now.timestamp_millis())
            .arg(iso(now))
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        outcome_lock(lock_id, reply)
    }

    async fn complete_consume(&self, lock_id: LockId, booking_id: BookingId, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let mut conn = self.conn().await?;
        let reply: Vec<String> = self
            .scripts
            .complete_consume
            .key(lock_key(lock_id))
            .arg(lock_id.to_string())
            .arg(booking_id.to_string())
            .arg(now.timestamp_millis())
            .arg(iso(now))
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        outcome_lock(lock_id, reply)
    }

    async fn abort_consume(&self, lock_id: LockId) -> Result<(), LockTableError> {
        let mut conn = self.conn().await?;
        let reply: Vec<String> = self
            .scripts
            .abort_consume
            .key(lock_key(lock_id))
            .arg(lock_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        outcome(lock_id, reply).map(|_| ())
    }

    async fn unbook(&self, showtime_id: ShowtimeId, seats: &[SeatId], booking_id: BookingId) -> Result<(), LockTableError> {
        let mut conn = self.conn().await?;
        let seats: Vec<String> = seats.iter().map(|s| s.to_string()).collect();
        let _: i64 = self
            .scripts
            .unbook
            .key(seats_key(showtime_id))
            .arg(booking_id.to_string())
            .arg(seats)
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;
        Ok(())
    }
}
