/// Lua script for fixed window rate limiting
///
/// The bucket key already encodes the window number, so the counter resets
/// when the key changes. The counter is only incremented for admitted
/// requests.
///
/// KEYS[1] = the bucket key
/// ARGV[1] = maximum requests per window
/// ARGV[2] = window duration (milliseconds)
///
/// Returns: 1 if allowed, 0 if denied
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local max_requests = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])

local current = tonumber(redis.call('GET', key) or '0')
if current >= max_requests then
    if redis.call('PTTL', key) < 0 then
        redis.call('PEXPIRE', key, window_ms)
    end
    return 0
end

current = redis.call('INCR', key)
if current == 1 or redis.call('PTTL', key) < 0 then
    redis.call('PEXPIRE', key, window_ms)
end

return 1
"#;

/// Lua script for sliding window rate limiting
///
/// Keeps one sorted-set member per admitted request, scored by its timestamp.
/// Entries at or before `now - window` are pruned before counting.
///
/// KEYS[1] = the sliding window key
/// ARGV[1] = maximum requests within the window
/// ARGV[2] = window duration (milliseconds)
/// ARGV[3] = current timestamp (milliseconds)
/// ARGV[4] = unique member for this request
///
/// Returns: 1 if allowed, 0 if denied
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local max_requests = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window_ms)

local current_count = redis.call('ZCARD', key)
if current_count >= max_requests then
    redis.call('PEXPIRE', key, window_ms)
    return 0
end

redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, window_ms)

return 1
"#;

/// Lua script for brute-force protection
///
/// The attempts counter and the lock flag are always read and written
/// together. Reaching the threshold sets the lock and clears the counter.
///
/// KEYS[1] = attempts counter key
/// KEYS[2] = lock flag key
/// ARGV[1] = failure threshold
/// ARGV[2] = failure window (milliseconds)
/// ARGV[3] = lockout duration (milliseconds)
/// ARGV[4] = mode: 'check', 'fail' or 'reset'
///
/// Returns: 1 if the identity is not locked, 0 if it is locked
pub const BRUTE_FORCE_SCRIPT: &str = r#"
local attempts_key = KEYS[1]
local lock_key = KEYS[2]
local max_attempts = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local lockout_ms = tonumber(ARGV[3])
local mode = ARGV[4]

if mode == 'reset' then
    redis.call('DEL', attempts_key, lock_key)
    return 1
end

if redis.call('EXISTS', lock_key) == 1 then
    return 0
end

if mode == 'check' then
    return 1
end

local attempts = redis.call('INCR', attempts_key)
if attempts == 1 or redis.call('PTTL', attempts_key) < 0 then
    redis.call('PEXPIRE', attempts_key, window_ms)
end

if attempts >= max_attempts then
    redis.call('SET', lock_key, attempts, 'PX', lockout_ms)
    redis.call('DEL', attempts_key)
    return 0
end

return 1
"#;
