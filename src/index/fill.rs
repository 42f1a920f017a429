use log::{debug, trace};
use rayon::prelude::*;

use crate::core::error::{Error, Result};
use crate::index::primary::{BucketCursor, PrimaryIndex};
use crate::index::Index;
use crate::storage::headers::{HeaderId, MasterPointers};

/// Batched construction kicks in above this many primary-index entries.
pub const BATCH_FILL_THRESHOLD: usize = 256 * 1024;

/// Headers are handed to `batch_insert` in blocks of this size.
pub const FILL_BLOCK_SIZE: usize = 1024 * 1024;

/// Everything an index fill needs to read from the collection.
pub struct FillContext<'a> {
    pub primary: &'a PrimaryIndex,
    pub pool: &'a MasterPointers,
    /// Worker threads of the fill pool; `None` means no pool.
    pub threads: Option<usize>,
    pub index_buckets: u32,
}

/// Initialize one index with every live document, choosing batched or
/// sequential construction.
pub fn fill_index(ctx: &FillContext<'_>, index: &mut Index) -> Result<()> {
    let nr_used = ctx.primary.len();
    index.size_hint(nr_used);

    let batched = ctx.threads.is_some()
        && index.supports_batch_insert()
        && ctx.index_buckets > 1
        && nr_used > BATCH_FILL_THRESHOLD;

    if batched {
        fill_index_batch(ctx, index)
    } else {
        fill_index_sequential(ctx, index)
    }
}

fn fill_index_batch(ctx: &FillContext<'_>, index: &mut Index) -> Result<()> {
    let threads = ctx.threads.unwrap_or(1);
    trace!(
        "fill-index-batch {{ {} }}, threads: {threads}, buckets: {}",
        index.context(),
        ctx.index_buckets
    );

    let nr_used = ctx.primary.len();
    let block_size = FILL_BLOCK_SIZE.min(nr_used).max(1);

    let mut block: Vec<HeaderId> = Vec::with_capacity(block_size);
    let mut cursor = BucketCursor::default();
    let mut total = 0u64;

    while let Some(header_id) = ctx.primary.lookup_sequential(&mut cursor, &mut total) {
        block.push(header_id);
        if block.len() == block_size {
            // Partial failure aborts the remainder.
            index.batch_insert(ctx.pool, &block, threads)?;
            block.clear();
        }
    }

    if !block.is_empty() {
        index.batch_insert(ctx.pool, &block, threads)?;
    }

    Ok(())
}

fn fill_index_sequential(ctx: &FillContext<'_>, index: &mut Index) -> Result<()> {
    trace!(
        "fill-index-sequential {{ {} }}, buckets: {}",
        index.context(),
        ctx.index_buckets
    );

    let mut cursor = BucketCursor::default();
    let mut total = 0u64;
    while let Some(header_id) = ctx.primary.lookup_sequential(&mut cursor, &mut total) {
        index.insert(ctx.pool, header_id, false)?;
    }
    Ok(())
}

/// Fill several indexes, fanning the work out across the pool when one is
/// configured. All fills run to completion; the worst error wins.
pub fn fill_indexes(ctx: &FillContext<'_>, indexes: &mut [Index]) -> Result<()> {
    if indexes.is_empty() {
        return Ok(());
    }

    debug!("filling {} secondary indexes", indexes.len());

    let results: Vec<Result<()>> = if ctx.threads.is_some() && indexes.len() > 1 {
        // The barrier is implicit: the parallel iterator joins all fills
        // before returning.
        indexes
            .par_iter_mut()
            .map(|index| fill_index(ctx, index))
            .collect()
    } else {
        indexes
            .iter_mut()
            .map(|index| fill_index(ctx, index))
            .collect()
    };

    let mut worst: Option<Error> = None;
    for result in results {
        if let Err(err) = result {
            Error::accumulate(&mut worst, err);
        }
    }
    match worst {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
