use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{
    client::{Registry, Result},
    fanout::FanOut,
    filter::{RENEW_AGE, RenewDecision, renew_decision},
    runtime::ContainerRuntime,
    style::Palette,
    truncate::BatchSummary,
};

/// Outcome of renewing one repository
#[derive(Debug, Default)]
pub struct RenewReport {
    pub image: String,
    pub renewed: Vec<String>,
    pub skipped: usize,
    pub failed: Vec<String>,
}

/// Pulls, pushes and removes locally every stale date-stamped tag of
/// `org/image`. In dry-run only the plan is printed.
pub async fn renew_repository(
    registry: &dyn Registry,
    runtime: &dyn ContainerRuntime,
    org: &str,
    image: &str,
    dry_run: bool,
    now: DateTime<Utc>,
    palette: Palette,
) -> Result<RenewReport> {
    let tags = registry.list_tags(image).await?;
    let mut report = RenewReport {
        image: image.to_string(),
        ..RenewReport::default()
    };

    for tag in &tags {
        let reference = format!("{org}/{image}:{}", tag.name);
        match renew_decision(tag, now) {
            RenewDecision::InvalidName => {
                println!("\t{}", palette.yellow(format!("Skip {reference} - invalid tag")));
                report.skipped += 1;
            }
            RenewDecision::Fresh => {
                println!(
                    "\t{}",
                    palette.yellow(format!(
                        "Skip {reference} - tag newer than {} hours",
                        RENEW_AGE.num_hours()
                    ))
                );
                report.skipped += 1;
            }
            RenewDecision::Renew if dry_run => {
                println!("\t{} Renew {reference}", palette.yellow("[DRY-RUN]"));
                report.renewed.push(tag.name.clone());
            }
            RenewDecision::Renew => {
                if renew_reference(runtime, &reference, palette).await {
                    report.renewed.push(tag.name.clone());
                } else {
                    report.failed.push(tag.name.clone());
                }
            }
        }
    }
    info!(%image, renewed = report.renewed.len(), skipped = report.skipped, "renewed repository");

    Ok(report)
}

/// Returns whether the image was pulled and pushed back.
async fn renew_reference(runtime: &dyn ContainerRuntime, reference: &str, palette: Palette) -> bool {
    println!("\t{}", palette.green(format!("<== Pulling from Docker Hub {reference}")));
    if let Err(err) = runtime.pull(reference).await {
        println!("\t{}", palette.red(format!("Error while pulling {reference}: {err}")));
        error!(%reference, error = %err, "pull failed");
        return false;
    }

    println!("\t{}", palette.green(format!("==> Pushing to Docker Hub {reference}")));
    let pushed = runtime.push(reference).await;
    if let Err(err) = &pushed {
        println!("\t{}", palette.red(format!("Error while pushing {reference}: {err}")));
        error!(%reference, error = %err, "push failed");
    }

    println!("\t{}", palette.green(format!("Removing from localhost {reference}")));
    if let Err(err) = runtime.remove_local(reference).await {
        error!(%reference, error = %err, "local removal failed");
    }

    pushed.is_ok()
}

/// Renews every image through `fanout`.
pub async fn renew_repositories(
    registry: Arc<dyn Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    org: String,
    images: Vec<String>,
    dry_run: bool,
    fanout: FanOut,
    palette: Palette,
) -> BatchSummary {
    let total = images.len();
    let org = Arc::new(org);
    let now = Utc::now();

    let outcomes = fanout
        .run(images, move |index, image: String| {
            let registry = registry.clone();
            let runtime = runtime.clone();
            let org = org.clone();
            async move {
                println!(
                    "{} {} {} {}/{}",
                    palette.blue("===>"),
                    palette.bold_white("Processing docker image repository"),
                    palette.bold_green(format!("{org}/{image}")),
                    index + 1,
                    total
                );
                let result = renew_repository(
                    registry.as_ref(),
                    runtime.as_ref(),
                    &org,
                    &image,
                    dry_run,
                    now,
                    palette,
                )
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
                error!(%image, failed = report.failed.len(), "some tags were not renewed");
                summary.failed.push(image);
            }
            Err(err) => {
                println!("{}", palette.red(format!("Error renewing tags for {image}: {err}")));
                error!(%image, error = %err, "failed to renew repository");
                summary.failed.push(image);
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use anyhow::bail;
    use async_trait::async_trait;

    use super::*;
    use crate::truncate::tests::{FakeRegistry, aged};

    /// Records every call; pulling a reference containing `fail_pull` fails.
    #[derive(Default)]
    struct FakeRuntime {
        fail_pull: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRuntime {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn pull(&self, reference: &str) -> anyhow::Result<()> {
            self.record(format!("pull {reference}"));
            if self.fail_pull.as_deref().is_some_and(|name| reference.contains(name)) {
                bail!("manifest unknown");
            }
            Ok(())
        }

        async fn push(&self, reference: &str) -> anyhow::Result<()> {
            self.record(format!("push {reference}"));
            Ok(())
        }

        async fn remove_local(&self, reference: &str) -> anyhow::Result<()> {
            self.record(format!("rm {reference}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_renews_only_stale_date_tags() {
        let registry = FakeRegistry::default().with_repo(
            "api",
            vec![
                aged("latest", 100),
                aged("24.01.01-10.00", 25),
                aged("24.05.01-10.00", 3),
            ],
        );
        let runtime = FakeRuntime::default();

        let report = renew_repository(&registry, &runtime, "acme", "api", false, Utc::now(), Palette::plain())
            .await
            .unwrap();

        assert_eq!(report.renewed, vec!["24.01.01-10.00"]);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            runtime.calls(),
            vec![
                "pull acme/api:24.01.01-10.00",
                "push acme/api:24.01.01-10.00",
                "rm acme/api:24.01.01-10.00",
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let registry = FakeRegistry::default().with_repo("api", vec![aged("24.01.01-10.00", 25)]);
        let runtime = FakeRuntime::default();

        let report = renew_repository(&registry, &runtime, "acme", "api", true, Utc::now(), Palette::plain())
            .await
            .unwrap();

        assert_eq!(report.renewed, vec!["24.01.01-10.00"]);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_pull_skips_push() {
        let registry = FakeRegistry::default().with_repo(
            "api",
            vec![aged("24.01.01-10.00", 25), aged("24.01.02-10.00", 25)],
        );
        let runtime = FakeRuntime {
            fail_pull: Some("24.01.01".to_string()),
            ..FakeRuntime::default()
        };

        let report = renew_repository(&registry, &runtime, "acme", "api", false, Utc::now(), Palette::plain())
            .await
            .unwrap();

        assert_eq!(report.failed, vec!["24.01.01-10.00"]);
        assert_eq!(report.renewed, vec!["24.01.02-10.00"]);
        assert_eq!(runtime.calls()[0], "pull acme/api:24.01.01-10.00");
        assert_eq!(runtime.calls()[1], "pull acme/api:24.01.02-10.00");
    }

    #[tokio::test]
    async fn test_batch_renews_every_repository() {
        let registry = Arc::new(
            FakeRegistry::default()
                .with_repo("a", vec![aged("24.01.01-10.00", 25)])
                .with_repo("b", vec![aged("24.01.01-10.00", 25)]),
        );
        let runtime = Arc::new(FakeRuntime::default());
        let images = vec!["a".to_string(), "gone".to_string(), "b".to_string()];

        let summary = renew_repositories(
            registry,
            runtime.clone(),
            "acme".to_string(),
            images,
            false,
            FanOut::new(2, Duration::from_millis(1)),
            Palette::plain(),
        )
        .await;

        assert_eq!(summary.processed, vec!["a", "b"]);
        assert_eq!(summary.failed, vec!["gone"]);
        assert_eq!(runtime.calls().len(), 6);
    }
}
