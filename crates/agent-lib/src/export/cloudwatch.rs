//! CloudWatch publisher

use super::{MetricsPublisher, PublishError};
use crate::models::MetricPoint;
use async_trait::async_trait;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use tracing::debug;

/// Publishes metric batches with `PutMetricData`
pub struct CloudWatchPublisher {
    client: aws_sdk_cloudwatch::Client,
}

impl CloudWatchPublisher {
    pub fn new(client: aws_sdk_cloudwatch::Client) -> Self {
        Self { client }
    }

    /// Convert a point into a CloudWatch datum
    pub fn to_datum(point: &MetricPoint) -> MetricDatum {
        let dimensions = point
            .dimensions
            .iter()
            .map(|d| Dimension::builder().name(&d.name).value(&d.value).build())
            .collect();

        MetricDatum::builder()
            .metric_name(&point.name)
            .timestamp(DateTime::from_secs(point.timestamp_secs))
            .set_dimensions(Some(dimensions))
            .value(point.value)
            .unit(StandardUnit::from(point.unit.as_str()))
            .storage_resolution(point.storage_resolution.seconds())
            .build()
    }
}

#[async_trait]
impl MetricsPublisher for CloudWatchPublisher {
    async fn publish(&self, namespace: &str, points: &[MetricPoint]) -> Result<(), PublishError> {
        let data = points.iter().map(Self::to_datum).collect();

        self.client
            .put_metric_data()
            .namespace(namespace)
            .set_metric_data(Some(data))
            .send()
            .await
            .map_err(|e| PublishError::Request(DisplayErrorContext(&e).to_string()))?;

        debug!(
            namespace = %namespace,
            points = points.len(),
            "Published metric batch"
        );
        Ok(())
    }
}
