use anyhow::{bail, Context, Result};
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::segment::Segment;
use crate::delivery::{Delivery, DeliveryRegistry};
use crate::session::Destination;

/// Outcome of delivering one segment to every destination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub segment_index: u64,
    /// Individual artifact sends attempted
    pub attempted: usize,
    pub failed: usize,
}

struct Route {
    destination: Destination,
    delivery: Arc<dyn Delivery>,
}

/// Fans closed segments out to a channel's destinations
///
/// Each segment is delivered on its own task so a slow destination never
/// holds up recording. Files are removed once every destination has been
/// attempted, whatever the outcome.
pub struct Dispatcher {
    channel_id: String,
    routes: Arc<Vec<Route>>,
    tasks: JoinSet<DeliveryReport>,
    dispatched: u64,
}

impl Dispatcher {
    /// Resolve every destination against the available deliveries
    ///
    /// A destination without an id or of an unknown type is a configuration
    /// fault for the whole channel.
    pub fn new(
        channel_id: &str,
        destinations: &[Destination],
        deliveries: &DeliveryRegistry,
    ) -> Result<Self> {
        let mut routes = Vec::with_capacity(destinations.len());
        for destination in destinations {
            if destination.id.trim().is_empty() {
                bail!(
                    "Destination of type '{}' for channel {} has no id",
                    destination.kind,
                    channel_id
                );
            }
            let delivery = deliveries.get(&destination.kind).with_context(|| {
                format!(
                    "No delivery available for destination type '{}' (available: {:?})",
                    destination.kind,
                    deliveries.kinds()
                )
            })?;
            delivery.check_destination(&destination.id).with_context(|| {
                format!(
                    "Invalid {} destination for channel {}",
                    destination.kind, channel_id
                )
            })?;
            routes.push(Route {
                destination: destination.clone(),
                delivery,
            });
        }

        if routes.is_empty() {
            warn!("Channel {} has no destinations; segments will be discarded", channel_id);
        }

        Ok(Self {
            channel_id: channel_id.to_string(),
            routes: Arc::new(routes),
            tasks: JoinSet::new(),
            dispatched: 0,
        })
    }

    /// Whether any destination wants isolated speaker files
    pub fn per_speaker_enabled(&self) -> bool {
        self.routes.iter().any(|r| r.destination.send_per_speaker)
    }

    /// Start delivering `segment` in the background
    pub fn deliver(&mut self, segment: Segment) {
        self.reap();
        self.dispatched += 1;
        let routes = Arc::clone(&self.routes);
        let channel_id = self.channel_id.clone();
        self.tasks
            .spawn(async move { deliver_segment(&channel_id, &routes, segment).await });
    }

    /// Segments handed over so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Deliveries still in flight
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every in-flight delivery
    pub async fn drain(&mut self) -> Vec<DeliveryReport> {
        let mut reports = Vec::new();
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Delivery task for {} failed: {}", self.channel_id, e),
            }
        }
        reports.sort_by_key(|r| r.segment_index);
        reports
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                warn!("Delivery task for {} failed: {}", self.channel_id, e);
            }
        }
    }
}

async fn deliver_segment(channel_id: &str, routes: &[Route], segment: Segment) -> DeliveryReport {
    let caption = segment.caption();

    let outcomes = join_all(
        routes
            .iter()
            .map(|route| deliver_to_destination(route, &segment, &caption)),
    )
    .await;

    let mut report = DeliveryReport {
        segment_index: segment.index,
        ..Default::default()
    };
    for (attempted, failed) in outcomes {
        report.attempted += attempted;
        report.failed += failed;
    }

    for file in segment.files() {
        remove_file(file).await;
    }

    info!(
        "Segment {} of {} delivered: {} sends, {} failed",
        segment.index, channel_id, report.attempted, report.failed
    );
    report
}

/// Artifacts for one destination go out in order: composite, then speakers
async fn deliver_to_destination(
    route: &Route,
    segment: &Segment,
    caption: &str,
) -> (usize, usize) {
    let destination = &route.destination;
    let mut attempted = 0;
    let mut failed = 0;

    if destination.send_composite {
        if let Some(file) = &segment.composite {
            attempted += 1;
            if let Err(e) = route
                .delivery
                .send_composite(&destination.id, file, caption)
                .await
            {
                failed += 1;
                warn!(
                    "{} delivery of {:?} to {} failed: {:#}",
                    route.delivery.name(),
                    file,
                    destination.id,
                    e
                );
            }
        }
    }

    if destination.send_per_speaker {
        for speaker in &segment.speakers {
            attempted += 1;
            let speaker_caption = segment.speaker_caption(&speaker.speaker_id);
            if let Err(e) = route
                .delivery
                .send_per_speaker(
                    &destination.id,
                    &speaker.speaker_id,
                    &speaker.path,
                    &speaker_caption,
                )
                .await
            {
                failed += 1;
                warn!(
                    "{} delivery of {:?} to {} failed: {:#}",
                    route.delivery.name(),
                    speaker.path,
                    destination.id,
                    e
                );
            }
        }
    }

    (attempted, failed)
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}
