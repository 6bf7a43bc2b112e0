//! Atomic dequeue scripts
//!
//! Peeking the lowest-scored member and removing it are two store
//! round-trips; these scripts fuse them into one server-side step so
//! two concurrent consumers can never pop the same member.

/// Pop the lowest-scored member, returning `[member, score]` or an
/// empty array when the set is empty
pub(crate) const POP_LOWEST: &str = "\
local val = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if val[1] then redis.call('ZREM', KEYS[1], val[1]) end
return val
";

/// Like [`POP_LOWEST`], but only pops while the lowest score is
/// strictly below the caller-supplied bound in `ARGV[1]`
pub(crate) const POP_LOWEST_GATED: &str = "\
local val = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if val[1] then
    if tonumber(val[2]) < tonumber(ARGV[1]) then
        redis.call('zrem', KEYS[1], val[1])
    else
        return nil
    end
end
return val
";
