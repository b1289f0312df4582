//! Lua scripts keeping records, indices and statistics in lockstep.

/// Insert a record.
///
/// KEYS: record, hash set, refs set, expires zset, uploaded zset, stats.
/// ARGV: id, require-existing-ref flag (`"1"`/`"0"`), expires ms,
/// negated uploaded ms, size, mime type, day bucket, then field/value pairs.
///
/// Returns 1 on insert, 0 if a reference was required and none exists,
/// -1 if the id is taken.
pub const PUT_RECORD: &str = r"
if ARGV[2] == '1' and redis.call('SCARD', KEYS[3]) == 0 then
  return 0
end
if redis.call('EXISTS', KEYS[1]) == 1 then
  return -1
end
redis.call('HSET', KEYS[1], unpack(ARGV, 8))
redis.call('SADD', KEYS[2], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[1])
redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
redis.call('ZADD', KEYS[5], ARGV[4], ARGV[1])
redis.call('HINCRBY', KEYS[6], 'files', 1)
redis.call('HINCRBY', KEYS[6], 'bytes', ARGV[5])
redis.call('HINCRBY', KEYS[6], 'mime:' .. ARGV[6], 1)
redis.call('HINCRBY', KEYS[6], 'day:' .. ARGV[7], 1)
return 1
";

/// Delete a record.
///
/// KEYS: record, expires zset, uploaded zset, stats, hash set, refs set.
/// ARGV: id, content hash, storage key (as read before the call).
///
/// Returns `{status, remaining_refs, {field, value, ...}}` where status is 1
/// on delete, 0 if the record is missing and -1 if its hash or storage key
/// no longer match the keys passed in. Stats fields that reach zero are
/// removed.
pub const DELETE_RECORD: &str = r"
local f = redis.call('HMGET', KEYS[1], 'content_hash', 'storage_key', 'size', 'mime_type', 'day')
if not f[1] then
  return {0, 0, {}}
end
if f[1] ~= ARGV[2] or f[2] ~= ARGV[3] then
  return {-1, 0, {}}
end
local record = redis.call('HGETALL', KEYS[1])
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[5], ARGV[1])
redis.call('SREM', KEYS[6], ARGV[1])
local remaining = redis.call('SCARD', KEYS[6])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
local function decr(field, by)
  if redis.call('HINCRBY', KEYS[4], field, -by) <= 0 then
    redis.call('HDEL', KEYS[4], field)
  end
end
decr('files', 1)
decr('bytes', tonumber(f[3]))
decr('mime:' .. f[4], 1)
decr('day:' .. f[5], 1)
return {1, remaining, record}
";
