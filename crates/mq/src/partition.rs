// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Conduit.
//
// Conduit is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Conduit is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Conduit. If not, see <https://www.gnu.org/licenses/>.

//! Key to partition mapping

use crate::client::{MqError, MqResult};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash
pub fn fnv1a32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Partition for a routing key. The empty key always maps to partition 0.
pub fn partition_for_key(key: &str, partition_count: usize) -> usize {
    if key.is_empty() || partition_count == 0 {
        return 0;
    }
    fnv1a32(key.as_bytes()) as usize % partition_count
}

/// Check every requested partition is inside `[0, partition_count)`
pub(crate) fn validate_partitions(partitions: &[usize], partition_count: usize) -> MqResult<()> {
    match partitions.iter().find(|p| **p >= partition_count) {
        Some(p) => Err(MqError::InvalidPartition {
            partition: *p,
            partition_count,
        }),
        None => Ok(()),
    }
}

/// Partitions a subscription reads: the requested subset or all of them
pub(crate) fn target_partitions(
    requested: Option<&[usize]>,
    partition_count: usize,
) -> MqResult<Vec<usize>> {
    match requested {
        Some(parts) => {
            validate_partitions(parts, partition_count)?;
            let mut parts = parts.to_vec();
            parts.sort_unstable();
            parts.dedup();
            Ok(parts)
        }
        None => Ok((0..partition_count).collect()),
    }
}
