use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{
    client::{Registry, Result},
    fanout::FanOut,
    filter::TagFilter,
    style::Palette,
};

/// Outcome of truncating one repository
#[derive(Debug, Default)]
pub struct TruncateReport {
    pub image: String,
    pub selected: Vec<String>,
    pub deleted: usize,
    pub failed: Vec<String>,
}

/// Outcome of a multi-repository run
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes the tags of `image` selected by `filter`.
///
/// The tags are listed once; every selected tag is attempted even when an
/// earlier deletion failed. In dry-run nothing is deleted.
pub async fn truncate_repository(
    registry: &dyn Registry,
    image: &str,
    filter: &TagFilter,
    dry_run: bool,
    now: DateTime<Utc>,
    palette: Palette,
) -> Result<TruncateReport> {
    let tags = registry.list_tags(image).await?;
    let selected = filter.select(&tags, now);
    info!(%image, tags = tags.len(), selected = selected.len(), "computed tags to truncate");

    let mut report = TruncateReport {
        image: image.to_string(),
        ..TruncateReport::default()
    };
    for tag in &selected {
        if dry_run {
            println!(
                "{} Delete tag {}:{}",
                palette.yellow("[DRY-RUN]"),
                image,
                palette.bold_white(tag)
            );
            continue;
        }

        println!("{} Delete tag {}", palette.green("\u{2714}"), palette.bold_white(tag));
        match registry.delete_tag(image, tag).await {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                println!("{}", palette.red(format!("Error while deleting image tag {tag}: {err}")));
                error!(%image, %tag, error = %err, "failed to delete tag");
                report.failed.push(tag.clone());
            }
        }
    }
    report.selected = selected;

    Ok(report)
}

/// Truncates every image through `fanout`. A failing repository is logged
/// and the others still run.
pub async fn truncate_repositories(
    registry: Arc<dyn Registry>,
    images: Vec<String>,
    filter: TagFilter,
    dry_run: bool,
    fanout: FanOut,
    palette: Palette,
) -> BatchSummary {
    let total = images.len();
    let filter = Arc::new(filter);
    let now = Utc::now();

    let outcomes = fanout
        .run(images, move |index, image: String| {
            let registry = registry.clone();
            let filter = filter.clone();
            async move {
                println!(
                    "{} {} {} {}/{}",
                    palette.blue("===>"),
                    palette.bold_white("Processing docker image repository"),
                    palette.bold_green(&image),
                    index + 1,
                    total
                );
                let result =
                    truncate_repository(registry.as_ref(), &image, &filter, dry_run, now, palette)
                        .await;
                (image, result)
            }
        })
        .await;

    let mut summary = BatchSummary::default();
    for (image, result) in outcomes {
        match result {
            Ok(report) if report.failed.is_empty() => summary.processed.push(image),
            Ok(report) => {
                error!(%image, failed = report.failed.len(), "some tags were not deleted");
                summary.failed.push(image);
            }
            Err(err) => {
                println!("{}", palette.red(format!("Error truncating tags for {image}: {err}")));
                error!(%image, error = %err, "failed to truncate repository");
                summary.failed.push(image);
            }
        }
    }

    summary
}
