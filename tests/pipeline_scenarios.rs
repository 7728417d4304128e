//! End-to-end pipeline runs against a SQLite seat database.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tempfile::tempdir;

use seat_kernel::registry::{decode_records, encode_records};
use seat_kernel::report::{HttpReportConfig, HttpReportSink};
use seat_kernel::{
    error_kind, CalibrationStore, CalibrationTransform, Detection, ErrorKind, InferencePipeline,
    Label, LogReportSink, OccupancyState, PixelPoint, ReportSink, Seat, SeatPoint, SeatRegistry,
    SqliteCalibrationStore, SqliteSeatRegistry, VenueLocks,
};

const VENUE: &str = "20";

// Pixel (x, y) -> seat plane (x - 100 + 300, y - 50 + 220).
fn translation() -> CalibrationTransform {
    CalibrationTransform::from_slice(&[1.0, 0.0, -100.0, 0.0, 1.0, -50.0, 0.0, 0.0, 1.0])
        .expect("valid transform")
}

fn provision(db_path: &Path) {
    let db = db_path.to_string_lossy().to_string();
    let mut calibration = SqliteCalibrationStore::open(&db).expect("open calibration");
    calibration.put(VENUE, &translation()).expect("put calibration");
    let mut registry = SqliteSeatRegistry::open(&db).expect("open registry");
    registry
        .provision(
            VENUE,
            &[
                Seat::new(1, SeatPoint::new(500, 400)),
                Seat::new(2, SeatPoint::new(900, 400)),
            ],
        )
        .expect("provision seats");
}

fn open_pipeline<R: ReportSink>(
    db_path: &Path,
    sink: R,
) -> InferencePipeline<SqliteCalibrationStore, SqliteSeatRegistry, R> {
    let db = db_path.to_string_lossy().to_string();
    InferencePipeline::new(
        SqliteCalibrationStore::open(&db).expect("open calibration"),
        SqliteSeatRegistry::open(&db).expect("open registry"),
        sink,
    )
}

fn detection(label: Label, x: i32, y: i32) -> Detection {
    Detection::new(label, PixelPoint::new(x, y))
}

#[test]
fn occupied_then_stepped_out_then_empty() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);
    let mut pipeline = open_pipeline(&db, LogReportSink);

    // (320, 240) -> (520, 410): ~22.4 from seat 1.
    let report = pipeline
        .run(VENUE, &[detection(Label::Person, 320, 240)])
        .unwrap();
    assert_eq!(report.state_of(1), Some(OccupancyState::Occupied));
    assert_eq!(report.state_of(2), Some(OccupancyState::Empty));

    // (340, 260) -> (540, 430): ~56.6 from seat 1, no person.
    let report = pipeline
        .run(VENUE, &[detection(Label::Object, 340, 260)])
        .unwrap();
    assert_eq!(report.state_of(1), Some(OccupancyState::SteppedOut));

    let report = pipeline.run(VENUE, &[]).unwrap();
    assert_eq!(report.state_of(1), Some(OccupancyState::Empty));
    assert_eq!(report.len(), 2);
}

#[test]
fn bag_under_occupied_seat_stays_occupied() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);
    let mut pipeline = open_pipeline(&db, LogReportSink);

    let report = pipeline
        .run(
            VENUE,
            &[
                detection(Label::Object, 305, 235),
                detection(Label::Person, 450, 230),
            ],
        )
        .unwrap();
    assert_eq!(report.state_of(1), Some(OccupancyState::Occupied));
}

#[test]
fn same_inputs_give_same_report() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);
    let mut pipeline = open_pipeline(&db, LogReportSink);

    let detections = [
        detection(Label::Person, 700, 230),
        detection(Label::Object, 330, 250),
    ];
    let first = pipeline.run(VENUE, &detections).unwrap();
    let second = pipeline.run(VENUE, &detections).unwrap();
    assert_eq!(first, second);
}

#[test]
fn persisted_states_survive_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);
    {
        let mut pipeline = open_pipeline(&db, LogReportSink);
        pipeline
            .run(VENUE, &[detection(Label::Person, 700, 230)])
            .unwrap();
    }

    let registry = SqliteSeatRegistry::open(&db.to_string_lossy()).unwrap();
    let collection = registry.load(VENUE).unwrap();
    let ids: Vec<u32> = collection.seats.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(collection.seats[0].position(), SeatPoint::new(500, 400));
    assert_eq!(collection.seats[0].state(), OccupancyState::Empty);
    assert_eq!(collection.seats[1].state(), OccupancyState::Occupied);
}

#[test]
fn unprovisioned_venue_fails_without_touching_registry() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);

    let mut registry = SqliteSeatRegistry::open(&db.to_string_lossy()).unwrap();
    registry
        .provision("31", &[Seat::new(7, SeatPoint::new(10, 10))])
        .unwrap();
    let before = registry.load("31").unwrap();

    let mut pipeline = open_pipeline(&db, LogReportSink);
    let err = pipeline
        .run("31", &[detection(Label::Person, 0, 0)])
        .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::CalibrationMissing));
    assert!(err.to_string().contains("31"));
    assert_eq!(registry.load("31").unwrap(), before);
}

#[test]
fn torn_seat_records_load_their_prefix() {
    let seats = vec![
        Seat::new(1, SeatPoint::new(500, 400)).with_state(OccupancyState::Occupied),
        Seat::new(2, SeatPoint::new(900, 400)),
    ];
    let mut bytes = encode_records(&seats).unwrap();
    bytes.extend_from_slice(br#"{"id":3,"position":{"x":13"#);
    let decoded = decode_records(&bytes);
    assert_eq!(decoded.seats, seats);
}

fn serve_one_status(status: u16) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap_or(0);
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request_complete(&request) {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        );
        stream.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&request).to_string()
    });
    (format!("http://{}/api/seat/status", addr), handle)
}

fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some((headers, body)) = text.split_once("\r\n\r\n") else {
        return false;
    };
    let length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    body.len() >= length
}

#[test]
fn report_is_posted_with_token() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);

    let (url, server) = serve_one_status(200);
    let sink = HttpReportSink::new(HttpReportConfig {
        url,
        token: Some("secret-token".to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let mut pipeline = open_pipeline(&db, sink);
    pipeline
        .run(VENUE, &[detection(Label::Person, 320, 240)])
        .unwrap();

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /api/seat/status"));
    assert!(request.contains("Bearer secret-token"));
    let body = request.split_once("\r\n\r\n").unwrap().1;
    let payload: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(payload["cafeId"], 20);
    assert_eq!(payload["statusList"][0]["seatID"], 1);
    assert_eq!(payload["statusList"][0]["state"], "using_table");
    assert_eq!(payload["statusList"][1]["state"], "empty_table");
}

#[test]
fn rejected_report_still_persists() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);

    let (url, server) = serve_one_status(500);
    let sink = HttpReportSink::new(HttpReportConfig {
        url,
        token: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let mut pipeline = open_pipeline(&db, sink);
    let report = pipeline
        .run(VENUE, &[detection(Label::Person, 320, 240)])
        .expect("run survives reporting failure");
    server.join().unwrap();

    assert_eq!(report.state_of(1), Some(OccupancyState::Occupied));
    let registry = SqliteSeatRegistry::open(&db.to_string_lossy()).unwrap();
    assert_eq!(
        registry.load(VENUE).unwrap().seats[0].state(),
        OccupancyState::Occupied
    );
}

#[test]
fn unreachable_sink_is_reported_as_reporting_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/status", listener.local_addr().unwrap());
    drop(listener);

    let mut sink = HttpReportSink::new(HttpReportConfig {
        url,
        token: None,
        timeout: Duration::from_secs(2),
    })
    .unwrap();
    let err = sink
        .report(VENUE, &seat_kernel::StatusReport::default())
        .unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::ReportingFailure));
}

#[test]
fn concurrent_runs_on_one_venue_are_serialised() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("seats.db");
    provision(&db);

    let locks = VenueLocks::new();
    let db_str = db.to_string_lossy().to_string();
    let mut pipelines = Vec::new();
    for _ in 0..4 {
        pipelines.push(InferencePipeline::with_locks(
            SqliteCalibrationStore::open(&db_str).unwrap(),
            SqliteSeatRegistry::open(&db_str).unwrap(),
            LogReportSink,
            locks.clone(),
        ));
    }
    let before = SqliteSeatRegistry::open(&db_str)
        .unwrap()
        .load(VENUE)
        .unwrap()
        .revision;

    let handles: Vec<_> = pipelines
        .into_iter()
        .map(|mut pipeline| {
            thread::spawn(move || {
                for _ in 0..5 {
                    pipeline
                        .run(VENUE, &[detection(Label::Person, 320, 240)])
                        .expect("serialised run");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let after = SqliteSeatRegistry::open(&db_str)
        .unwrap()
        .load(VENUE)
        .unwrap()
        .revision;
    assert_eq!(after, before + 20);
}
