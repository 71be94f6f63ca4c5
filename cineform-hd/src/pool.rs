// Cineform
// Copyright (c) 2025 The Project Cineform Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `pool` module provides the worker scheduling used by the codec.
//!
//! Two layers: [`fan_out`] partitions the items of one pipeline stage across scoped worker
//! threads and joins them, forming the barrier that closes the stage; [`EncoderPool`] is
//! the asynchronous multi-sample pipeline, feeding a set of encoder workers through
//! channels and handing samples back in submission order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::debug;

use cineform_core::errors::{config_error, Error, Result};

use crate::common::{EncodedFormat, PixelFormat, Quality};
use crate::encoder::{Encoder, EncoderFlags};

/// Run `f` over every item, partitioned round-robin across at most `threads` scoped
/// workers, preserving item order in the result. With one thread (or one item) the work
/// runs inline.
pub(crate) fn fan_out<T, R, F>(threads: usize, items: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if threads <= 1 || items.len() <= 1 {
        return items.into_iter().map(f).collect();
    }

    let workers = threads.min(items.len());
    let count = items.len();

    let mut buckets: Vec<Vec<(usize, T)>> = (0..workers).map(|_| Vec::new()).collect();
    for (index, item) in items.into_iter().enumerate() {
        buckets[index % workers].push((index, item));
    }

    let mut results: Vec<Option<R>> = (0..count).map(|_| None).collect();

    std::thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = buckets
            .into_iter()
            .map(|bucket| {
                scope.spawn(move || {
                    bucket.into_iter().map(|(index, item)| (index, f(item))).collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            for (index, result) in handle.join().expect("band worker panicked") {
                results[index] = Some(result);
            }
        }
    });

    results.into_iter().map(|slot| slot.expect("worker covered every index")).collect()
}

struct Job {
    sequence: u64,
    frame: Vec<u8>,
    pitch: usize,
}

/// An asynchronous encoding pipeline over a fixed set of encoder workers.
///
/// Samples are submitted with [`EncoderPool::encode_async`] and collected with
/// [`EncoderPool::wait_for_sample`]; the output queue returns samples in submission order
/// regardless of which worker finished first, enforced by per-submission sequence numbers.
pub struct EncoderPool {
    num_encoders: usize,
    config: Option<PoolConfig>,
    job_tx: Option<Sender<Job>>,
    result_rx: Option<Receiver<(u64, Result<Vec<u8>>)>>,
    workers: Vec<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    /// Finished samples waiting for earlier sequence numbers.
    reorder: BTreeMap<u64, Result<Vec<u8>>>,
    next_submit: u64,
    next_deliver: u64,
}

#[derive(Copy, Clone)]
struct PoolConfig {
    width: usize,
    height: usize,
    pixel_format: PixelFormat,
    encoded_format: EncodedFormat,
    flags: EncoderFlags,
    quality: Quality,
}

impl EncoderPool {
    pub fn new(num_encoders: usize) -> Self {
        EncoderPool {
            num_encoders: num_encoders.max(1),
            config: None,
            job_tx: None,
            result_rx: None,
            workers: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            reorder: BTreeMap::new(),
            next_submit: 0,
            next_deliver: 0,
        }
    }

    /// Store the encode configuration every worker prepares with.
    pub fn prepare(
        &mut self,
        width: usize,
        height: usize,
        pixel_format: PixelFormat,
        encoded_format: EncodedFormat,
        flags: EncoderFlags,
        quality: Quality,
    ) -> Result<()> {
        // Validate eagerly so start() cannot fail late on a bad configuration.
        Encoder::new().prepare(width, height, pixel_format, encoded_format, flags, quality)?;
        self.config =
            Some(PoolConfig { width, height, pixel_format, encoded_format, flags, quality });
        Ok(())
    }

    /// Spawn the worker threads.
    pub fn start(&mut self) -> Result<()> {
        let config = match self.config {
            Some(config) => config,
            None => return config_error("pool not prepared"),
        };
        if !self.workers.is_empty() {
            return config_error("pool already started");
        }

        self.cancelled.store(false, Ordering::SeqCst);

        // Submission never blocks; the reorder buffer at the receiver absorbs bursts.
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<(u64, Result<Vec<u8>>)>();

        for worker in 0..self.num_encoders {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancelled = Arc::clone(&self.cancelled);

            let handle = std::thread::Builder::new()
                .name(format!("cfhd-encode-{}", worker))
                .spawn(move || {
                    // Each worker owns one single-threaded encoder; parallelism comes from
                    // the pool, not from nested fan-out.
                    let mut encoder = Encoder::new().with_threads(1);
                    if encoder
                        .prepare(
                            config.width,
                            config.height,
                            config.pixel_format,
                            config.encoded_format,
                            config.flags,
                            config.quality,
                        )
                        .is_err()
                    {
                        return;
                    }

                    while let Ok(job) = job_rx.recv() {
                        let result = if cancelled.load(Ordering::SeqCst) {
                            Err(Error::Cancelled)
                        }
                        else {
                            encoder
                                .encode_sample(&job.frame, job.pitch)
                                .map(|()| encoder.sample_data().to_vec())
                        };

                        if result_tx.send((job.sequence, result)).is_err() {
                            break;
                        }
                    }
                })
                .expect("failed to spawn encoder worker");

            self.workers.push(handle);
        }

        self.job_tx = Some(job_tx);
        self.result_rx = Some(result_rx);
        debug!("encoder pool started with {} workers", self.num_encoders);
        Ok(())
    }

    /// Submit one frame. Returns the sample's sequence number.
    pub fn encode_async(&mut self, frame: Vec<u8>, pitch: usize) -> Result<u64> {
        let job_tx = match &self.job_tx {
            Some(tx) => tx,
            None => return config_error("pool not started"),
        };

        let sequence = self.next_submit;
        if job_tx.send(Job { sequence, frame, pitch }).is_err() {
            return Err(Error::Cancelled);
        }

        self.next_submit += 1;
        Ok(sequence)
    }

    /// Block until the next sample in submission order is ready.
    pub fn wait_for_sample(&mut self) -> Result<(u64, Vec<u8>)> {
        loop {
            if let Some(ready) = self.take_next_ready()? {
                return Ok(ready);
            }

            let result_rx = match &self.result_rx {
                Some(rx) => rx,
                None => return Err(Error::Cancelled),
            };

            match result_rx.recv() {
                Ok((sequence, result)) => {
                    self.reorder.insert(sequence, result);
                }
                // All workers are gone; anything not yet delivered was cancelled.
                Err(_) => return Err(Error::Cancelled),
            }
        }
    }

    /// Non-blocking variant of [`EncoderPool::wait_for_sample`]. Returns `Ok(None)` when
    /// the next sample in order is not ready yet.
    pub fn test_for_sample(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        let result_rx = match &self.result_rx {
            Some(rx) => rx,
            None => return Err(Error::Cancelled),
        };

        loop {
            match result_rx.try_recv() {
                Ok((sequence, result)) => {
                    self.reorder.insert(sequence, result);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        self.take_next_ready()
    }

    fn take_next_ready(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        if let Some(result) = self.reorder.remove(&self.next_deliver) {
            let sequence = self.next_deliver;
            self.next_deliver += 1;
            return result.map(|bytes| Some((sequence, bytes)));
        }
        Ok(None)
    }

    /// Stop the pipeline. Queued but unencoded jobs drain as `Cancelled`, and subsequent
    /// waits report `Cancelled`.
    pub fn stop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Closing both channels unblocks workers stuck on either end.
        self.job_tx = None;
        self.result_rx = None;

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for EncoderPool {
    fn drop(&mut self) {
        self.stop();
    }
}
