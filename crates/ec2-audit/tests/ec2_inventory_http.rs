//! EC2 inventory against a scripted HTTP client
//!
//! Drives the real SDK request/response path with canned EC2 responses, so
//! retry, timeout and error tagging run end to end without AWS.

use aws_sdk_ec2::Client;
use aws_sdk_ec2::config::retry::RetryConfig;
use aws_sdk_ec2::config::{BehaviorVersion, Credentials, Region, StalledStreamProtectionConfig};
use aws_smithy_runtime_api::client::http::{
    HttpClient, HttpConnector, HttpConnectorFuture, HttpConnectorSettings, SharedHttpConnector,
};
use aws_smithy_runtime_api::client::orchestrator::{HttpRequest, HttpResponse};
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_runtime_api::http::StatusCode;
use aws_smithy_types::body::SdkBody;
use backon::ExponentialBuilder;
use ec2_audit::aws::{AwsError, Ec2Inventory, classify_anyhow_error};
use ec2_audit_core::{Instance, InventoryProvider};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Status(u16, &'static str),
    Stall,
}

/// Answers requests from a queue of replies and records each request body.
/// Once the queue is empty every further request stalls.
#[derive(Debug, Clone)]
struct StubEc2 {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubEc2 {
    fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index].clone()
    }
}

impl HttpConnector for StubEc2 {
    fn call(&self, request: HttpRequest) -> HttpConnectorFuture {
        let body = request
            .body()
            .bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        self.requests.lock().unwrap().push(body);

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Status(status, body)) => HttpConnectorFuture::new(async move {
                let status = StatusCode::try_from(status).expect("valid status code");
                Ok(HttpResponse::new(status, SdkBody::from(body)))
            }),
            Some(Reply::Stall) | None => HttpConnectorFuture::new(std::future::pending()),
        }
    }
}

impl HttpClient for StubEc2 {
    fn http_connector(
        &self,
        _settings: &HttpConnectorSettings,
        _components: &RuntimeComponents,
    ) -> SharedHttpConnector {
        SharedHttpConnector::new(self.clone())
    }
}

const VOLUMES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeVolumesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>req-volumes</requestId>
    <volumeSet>
        <item>
            <volumeId>vol-root</volumeId>
            <encrypted>true</encrypted>
            <attachmentSet>
                <item>
                    <volumeId>vol-root</volumeId>
                    <instanceId>i-0abc</instanceId>
                    <device>/dev/xvda</device>
                </item>
            </attachmentSet>
        </item>
    </volumeSet>
</DescribeVolumesResponse>"#;

const CURRENT_IMAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeImagesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>req-image</requestId>
    <imagesSet>
        <item>
            <imageId>ami-0old</imageId>
            <imageOwnerId>123456789012</imageOwnerId>
            <architecture>x86_64</architecture>
            <rootDeviceType>ebs</rootDeviceType>
            <rootDeviceName>/dev/xvda</rootDeviceName>
            <virtualizationType>hvm</virtualizationType>
            <creationDate>2024-03-01T10:00:00.000Z</creationDate>
            <blockDeviceMapping>
                <item>
                    <deviceName>/dev/xvda</deviceName>
                    <ebs>
                        <volumeType>gp3</volumeType>
                    </ebs>
                </item>
            </blockDeviceMapping>
        </item>
    </imagesSet>
</DescribeImagesResponse>"#;

const SAME_KIND_IMAGES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeImagesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>req-images</requestId>
    <imagesSet>
        <item>
            <imageId>ami-0old</imageId>
            <creationDate>2024-03-01T10:00:00.000Z</creationDate>
        </item>
        <item>
            <imageId>ami-0new</imageId>
            <creationDate>2025-01-15T08:30:00.000Z</creationDate>
        </item>
    </imagesSet>
</DescribeImagesResponse>"#;

const THROTTLED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Errors>
        <Error>
            <Code>RequestLimitExceeded</Code>
            <Message>Request limit exceeded.</Message>
        </Error>
    </Errors>
    <RequestID>req-throttled</RequestID>
</Response>"#;

const UNAUTHORIZED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Errors>
        <Error>
            <Code>UnauthorizedOperation</Code>
            <Message>You are not authorized to perform this operation.</Message>
        </Error>
    </Errors>
    <RequestID>req-denied</RequestID>
</Response>"#;

fn inventory(stub: &StubEc2, timeout: Duration) -> Ec2Inventory {
    // SDK retries off so every retry observed comes from the inventory's own backoff
    let config = aws_sdk_ec2::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "stub"))
        .retry_config(RetryConfig::disabled())
        .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
        .http_client(stub.clone())
        .build();

    Ec2Inventory::new(Client::from_conf(config))
        .with_lookup_timeout(timeout)
        .with_backoff(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5))
                .with_max_times(5),
        )
}

fn instance() -> Instance {
    Instance::builder("i-0abc")
        .root_device_name("/dev/xvda")
        .build()
}

#[tokio::test]
async fn stalled_volume_lookup_times_out() {
    let stub = StubEc2::new([Reply::Stall]);
    let inventory = inventory(&stub, Duration::from_millis(100));

    let err = inventory.volumes(&instance()).await.unwrap_err();

    assert!(err.to_string().contains("timed out"), "got: {err:#}");
    assert!(err.to_string().contains("i-0abc"));
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn throttled_volume_lookup_is_retried() {
    let stub = StubEc2::new([
        Reply::Status(503, THROTTLED),
        Reply::Status(503, THROTTLED),
        Reply::Status(200, VOLUMES),
    ]);
    let inventory = inventory(&stub, Duration::from_secs(5));

    let volumes = inventory.volumes(&instance()).await.unwrap();

    assert_eq!(stub.calls(), 3);
    assert_eq!(volumes.len(), 1);
    assert!(volumes[0].is_root());
    assert!(volumes[0].is_encrypted());
}

#[tokio::test]
async fn unauthorized_volume_lookup_is_not_retried() {
    let stub = StubEc2::new([
        Reply::Status(403, UNAUTHORIZED),
        Reply::Status(200, VOLUMES),
    ]);
    let inventory = inventory(&stub, Duration::from_secs(5));

    let err = inventory.volumes(&instance()).await.unwrap_err();

    assert_eq!(stub.calls(), 1);
    assert!(format!("{err:#}").contains("Access denied"), "got: {err:#}");
    assert!(matches!(classify_anyhow_error(&err), AwsError::AccessDenied));
}

#[tokio::test]
async fn latest_image_searches_images_of_the_same_kind() {
    let stub = StubEc2::new([
        Reply::Status(200, CURRENT_IMAGE),
        Reply::Status(200, SAME_KIND_IMAGES),
    ]);
    let inventory = inventory(&stub, Duration::from_secs(5));

    let latest = inventory.latest_image("ami-0old").await.unwrap();

    assert_eq!(latest, "ami-0new");
    assert_eq!(stub.calls(), 2);
    let search = stub.request(1);
    for expected in ["owner-id", "123456789012", "available", "x86_64", "hvm", "gp3"] {
        assert!(search.contains(expected), "{expected} missing from {search}");
    }
}

#[tokio::test]
async fn throttled_image_search_is_retried() {
    let stub = StubEc2::new([
        Reply::Status(503, THROTTLED),
        Reply::Status(200, CURRENT_IMAGE),
        Reply::Status(200, SAME_KIND_IMAGES),
    ]);
    let inventory = inventory(&stub, Duration::from_secs(5));

    assert_eq!(inventory.latest_image("ami-0old").await.unwrap(), "ami-0new");
    assert_eq!(stub.calls(), 3);
}
