//! Sharded bloom index over the trace IDs of a block.
//!
//! Each shard is an independent bloom filter persisted as its own object so a
//! lookup only fetches the shard its ID hashes to. Hashing is blake3 based and
//! therefore stable across processes and platforms.

/// Upper bound on the number of shards of one block.
pub const MAX_SHARD_COUNT: usize = 1000;

const HEADER_LEN: usize = 12;

struct TraceIdHash {
    shard: u64,
    h1: u64,
    h2: u64,
}

fn hash_trace_id(trace_id: &[u8]) -> TraceIdHash {
    let digest = blake3::hash(trace_id);
    let bytes = digest.as_bytes();
    let word = |i: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
        u64::from_le_bytes(buf)
    };
    TraceIdHash {
        shard: word(0),
        h1: word(1),
        // odd step so successive probes never collapse onto one bit
        h2: word(2) | 1,
    }
}

/// Shard that holds `trace_id` in a bloom with `shard_count` shards.
pub fn shard_key_for_trace_id(trace_id: &[u8], shard_count: usize) -> usize {
    (hash_trace_id(trace_id).shard % shard_count.max(1) as u64) as usize
}

/// Bit count and probe count of a filter holding `items` at rate `fp`.
fn estimate_parameters(items: usize, fp: f64) -> (usize, u32) {
    let items = items.max(1) as f64;
    let ln2 = std::f64::consts::LN_2;
    let bits = (-items * fp.ln() / (ln2 * ln2)).ceil().max(64.0);
    let hashes = ((bits / items) * ln2).ceil().clamp(1.0, 30.0);
    (bits as usize, hashes as u32)
}

/// One persisted bloom filter (double hashing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomShard {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomShard {
    fn new(num_bits: usize, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(64);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            num_hashes,
        }
    }

    fn probes(&self, hash: &TraceIdHash) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = (hash.h1, hash.h2);
        (0..self.num_hashes).map(move |i| {
            (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as usize
        })
    }

    fn insert(&mut self, hash: &TraceIdHash) {
        let probes: Vec<usize> = self.probes(hash).collect();
        for idx in probes {
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    pub fn might_contain(&self, trace_id: &[u8]) -> bool {
        let hash = hash_trace_id(trace_id);
        self.probes(&hash)
            .all(|idx| self.bits[idx / 64] & (1u64 << (idx % 64)) != 0)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.bits.len() * 8);
        buf.extend_from_slice(&(self.num_bits as u32).to_le_bytes());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Parse a shard written by [`BloomShard::to_bytes`]. `None` when the
    /// bytes are truncated or inconsistent.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = data.get(..HEADER_LEN)?;
        let num_bits = u32::from_le_bytes(header[0..4].try_into().ok()?) as usize;
        let num_hashes = u32::from_le_bytes(header[4..8].try_into().ok()?);
        let word_count = u32::from_le_bytes(header[8..12].try_into().ok()?) as usize;

        if num_bits == 0 || num_hashes == 0 || word_count != num_bits.div_ceil(64) {
            return None;
        }
        let body = &data[HEADER_LEN..];
        if body.len() != word_count * 8 {
            return None;
        }

        let bits = body
            .chunks_exact(8)
            .map(|chunk| chunk.try_into().map(u64::from_le_bytes))
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        Some(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }
}

/// Bloom index split into independently persisted shards.
#[derive(Debug, Clone)]
pub struct ShardedBloom {
    shards: Vec<BloomShard>,
}

impl ShardedBloom {
    /// Size the index for `estimated_objects` IDs at false-positive rate `fp`.
    ///
    /// Every shard is `shard_size_bytes` large; the shard count is the number
    /// of such shards the estimate needs, clamped to `[1, MAX_SHARD_COUNT]`.
    pub fn new(fp: f64, shard_size_bytes: usize, estimated_objects: usize) -> Self {
        let shard_bits = shard_size_bytes.max(8) * 8;
        let (bits, hashes) = estimate_parameters(estimated_objects, fp);
        let shard_count = bits.div_ceil(shard_bits).clamp(1, MAX_SHARD_COUNT);

        Self {
            shards: (0..shard_count)
                .map(|_| BloomShard::new(shard_bits, hashes))
                .collect(),
        }
    }

    pub fn add(&mut self, trace_id: &[u8]) {
        let hash = hash_trace_id(trace_id);
        let shard = (hash.shard % self.shards.len() as u64) as usize;
        self.shards[shard].insert(&hash);
    }

    pub fn might_contain(&self, trace_id: &[u8]) -> bool {
        let shard = shard_key_for_trace_id(trace_id, self.shards.len());
        self.shards[shard].might_contain(trace_id)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Serialised shards, indexed by shard key.
    pub fn marshal(&self) -> Vec<Vec<u8>> {
        self.shards.iter().map(BloomShard::to_bytes).collect()
    }
}
