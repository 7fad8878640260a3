//! Job ↔ upload association by creation time.
//!
//! Jobs do not store the upload they were started from, so the jobs view
//! pairs each job with the nearest upload created at most
//! [`MATCH_WINDOW_SECS`] before it. This is a best-effort annotation: two
//! uploads followed by two jobs inside one window can pair the wrong way.
//!
//! Inputs must already be scoped to one owner; pairs across owners are
//! never produced.

use chrono::Duration;

use crate::store::resource::{ProcessingJob, Upload};

pub const MATCH_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Copy)]
pub struct JobMatch<'a> {
    pub job: &'a ProcessingJob,
    pub upload: Option<&'a Upload>,
}

/// Pairs jobs with uploads. Output follows the order of `jobs`.
///
/// Jobs are considered oldest first and each upload is used at most once.
pub fn match_jobs_to_uploads<'a>(
    jobs: &'a [ProcessingJob],
    uploads: &'a [Upload],
    window: Duration,
) -> Vec<JobMatch<'a>> {
    let mut order: Vec<usize> = (0..jobs.len()).collect();
    order.sort_by_key(|&i| jobs[i].created_at);

    let mut used = vec![false; uploads.len()];
    let mut matched: Vec<Option<usize>> = vec![None; jobs.len()];

    for job_index in order {
        let job = &jobs[job_index];
        let best = uploads
            .iter()
            .enumerate()
            .filter(|(i, upload)| {
                !used[*i]
                    && upload.owner == job.owner
                    && upload.created_at <= job.created_at
                    && job.created_at - upload.created_at <= window
            })
            .max_by_key(|(_, upload)| upload.created_at)
            .map(|(i, _)| i);

        if let Some(upload_index) = best {
            used[upload_index] = true;
            matched[job_index] = Some(upload_index);
        }
    }

    jobs.iter()
        .zip(matched)
        .map(|(job, upload)| JobMatch {
            job,
            upload: upload.map(|i| &uploads[i]),
        })
        .collect()
}
