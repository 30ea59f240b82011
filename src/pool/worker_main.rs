//! Reference worker entry points.
//!
//! `transit-core internal-worker` speaks the pool wire protocol and
//! `transit-core internal-predict '<json>'` behaves like a transient
//! predictor. Neither computes anything real: they return deterministic
//! payloads and expose a few request types that misbehave on purpose so the
//! pool's failure handling can be exercised end to end.

use super::protocol::{DEFAULT_READY_MARKER, PROTOCOL_VERSION, ReplyFrame, WorkRequest};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::time::Duration;

/// Exit code used by the `crash` request type.
pub const CRASH_EXIT_CODE: i32 = 3;

/// Fields a prediction input must carry.
const REQUIRED_PREDICT_FIELDS: [&str; 8] = [
    "ship_date",
    "zone",
    "carrier",
    "service_level",
    "package_weight_lbs",
    "package_length_in",
    "package_width_in",
    "package_height_in",
];

/// Options for the reference worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Pause before announcing readiness.
    pub startup_delay: Duration,
    /// Never print the readiness marker.
    pub silent: bool,
}

/// Worker main loop.
///
/// Reads requests from stdin until EOF and answers each on stdout.
pub fn run_worker_main(options: &WorkerOptions) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    worker_loop(options, stdin.lock(), stdout.lock())
}

fn worker_loop(options: &WorkerOptions, input: impl BufRead, mut output: impl Write) -> io::Result<()> {
    if !options.startup_delay.is_zero() {
        eprintln!("Loading analyzers...");
        std::thread::sleep(options.startup_delay);
    }
    if !options.silent {
        eprintln!("{} - waiting for requests", DEFAULT_READY_MARKER);
    }

    let mut served: u64 = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request = match WorkRequest::from_line(&line) {
            Ok(req) => req,
            Err(e) => {
                write_line(&mut output, &ReplyFrame::err(None, format!("Invalid JSON: {}", e)).to_line())?;
                continue;
            }
        };
        served += 1;

        match handle(&request, served) {
            Reply::Frame(frame) => write_line(&mut output, &frame.to_line())?,
            Reply::Raw(text) => write_line(&mut output, &text)?,
            Reply::Silent => {}
            Reply::Exit(code) => {
                output.flush()?;
                std::process::exit(code);
            }
        }
    }
    Ok(())
}

enum Reply {
    Frame(ReplyFrame),
    Raw(String),
    Silent,
    Exit(i32),
}

fn handle(request: &WorkRequest, served: u64) -> Reply {
    let id = request.id.clone();
    let params = request.params.clone();
    match request.request_type.as_str() {
        "echo" => Reply::Frame(ReplyFrame::ok(id, params)),
        "sleep" => {
            let ms = sleep_millis(&params);
            std::thread::sleep(Duration::from_millis(ms));
            Reply::Frame(ReplyFrame::ok(
                id,
                json!({"slept_ms": ms, "pid": std::process::id()}),
            ))
        }
        "fail" => {
            let message = field(&params, "message")
                .and_then(Value::as_str)
                .unwrap_or("requested failure")
                .to_string();
            Reply::Frame(ReplyFrame::err(Some(id), message))
        }
        "crash" => Reply::Exit(CRASH_EXIT_CODE),
        "garbage" => Reply::Raw("this is not a reply\n".to_string()),
        "wrong_id" => Reply::Frame(ReplyFrame::ok(format!("{}-stale", id), Value::Null)),
        "bad_version" => Reply::Frame(ReplyFrame {
            v: Some(PROTOCOL_VERSION + 1),
            ..ReplyFrame::ok(id, Value::Null)
        }),
        "stall" => Reply::Silent,
        "pid" => Reply::Frame(ReplyFrame::ok(id, json!(std::process::id()))),
        "predict" => {
            let mut result = prediction(params);
            if result["success"] == true {
                if let Some(map) = result.as_object_mut() {
                    map.remove("success");
                }
                Reply::Frame(ReplyFrame::ok(id, result))
            } else {
                let message = result["error"].as_str().unwrap_or("prediction failed").to_string();
                Reply::Frame(ReplyFrame::err(Some(id), message))
            }
        }
        other => match query(&params) {
            Ok(query) => Reply::Frame(ReplyFrame::ok(
                id,
                json!({
                    "type": other,
                    "query": query,
                    "served": served,
                    "pid": std::process::id(),
                }),
            )),
            Err(message) => Reply::Frame(ReplyFrame::err(Some(id), message)),
        },
    }
}

/// Analytics params are positional: the query object is `params[0]`.
///
/// An empty array or object means no query; a non-empty object is rejected.
fn query(params: &Value) -> Result<Value, String> {
    match params {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or_else(|| json!({}))),
        Value::Object(map) if map.is_empty() => Ok(json!({})),
        Value::Object(_) => Err("params must be positional, got an object".to_string()),
        other => Err(format!("params must be positional, got {}", other)),
    }
}

/// A named test parameter, read from the params object or from `params[0]`.
fn field<'a>(params: &'a Value, name: &str) -> Option<&'a Value> {
    params.get(name).or_else(|| params.get(0)?.get(name))
}

/// `sleep` accepts `{"ms": N}`, `[{"ms": N}]` or `[N]`.
fn sleep_millis(params: &Value) -> u64 {
    field(params, "ms")
        .or_else(|| params.get(0))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn write_line(output: &mut impl Write, line: &str) -> io::Result<()> {
    output.write_all(line.as_bytes())?;
    output.flush()
}

/// Predictor main: decode one input, print one result, return the exit code.
pub fn run_predict_main(input: &str) -> i32 {
    let (result, code) = predict_line(input);
    println!("{}", result);
    code
}

fn predict_line(input: &str) -> (Value, i32) {
    match serde_json::from_str(input) {
        Ok(input) => (prediction(input), 0),
        Err(e) => (
            json!({"success": false, "error": format!("Invalid JSON input: {}", e)}),
            1,
        ),
    }
}

/// Deterministic stand-in for the model, shaped like the real predictor's output.
fn prediction(input: Value) -> Value {
    let missing: Vec<&str> = REQUIRED_PREDICT_FIELDS
        .iter()
        .copied()
        .filter(|f| input.get(f).is_none())
        .collect();
    if !missing.is_empty() {
        return json!({
            "success": false,
            "error": format!("Missing required fields: {:?}", missing),
            "required_fields": REQUIRED_PREDICT_FIELDS,
        });
    }

    let number = |field: &str| input.get(field).and_then(Value::as_f64).unwrap_or(0.0);
    let zone = number("zone");
    let weight = number("package_weight_lbs");
    let volume = number("package_length_in") * number("package_width_in") * number("package_height_in");

    let days = 1.0 + zone * 0.5;
    let cost = 4.5 + zone * 0.75 + weight * 0.4 + volume / 1728.0;
    json!({
        "success": true,
        "predictions": {
            "transit_time_days": round2(days),
            "shipping_cost_usd": round2(cost),
        },
        "input": input,
    })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
