//! Reproduction tokens: encoding failures and replaying them exactly.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use conjecture_engine::{
    decode_token, encode_token, integers, CaseError, ConjectureRunner, DrawRecord, DrawSequence, EngineError,
    FailureReason, Outcome, Settings, TokenError, Value,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sum_of_three(case: &mut conjecture_engine::TestCase) -> Result<(), CaseError> {
    let a = case.draw_integer(0, 100)?;
    let b = case.draw_integer(0, 100)?;
    let c = case.draw_integer(0, 100)?;
    if a + b + c > 100 {
        return Err(CaseError::fail(format!("{} + {} + {} > 100", a, b, c)));
    }
    Ok(())
}

#[test]
fn test_token_replays_the_same_failure() {
    init_logging();
    let settings = Settings::default().seed(17).no_database().deadline(None);
    let first = ConjectureRunner::new("sum_of_three", settings.clone())
        .run(sum_of_three)
        .unwrap();
    let example = first.counterexample.expect("expected a failure");
    let token = example.token.clone().expect("print_blob is on by default");

    let decoded = decode_token(&token).unwrap();
    assert_eq!(decoded, example.draws);
    assert!(decoded.len() >= 3);

    let replayed = ConjectureRunner::new("sum_of_three", settings.reproduce(token.clone()))
        .run(sum_of_three)
        .unwrap();
    assert_eq!(replayed.statistics.cases, 1);
    assert_eq!(replayed.outcome, first.outcome);
    let again = replayed.counterexample.unwrap();
    assert_eq!(again.arguments, example.arguments);
    assert_eq!(again.token.as_deref(), Some(token.as_str()));
    assert_eq!(again.seed, None);
}

#[test]
fn test_hand_built_token() {
    init_logging();
    let draws: DrawSequence = vec![DrawRecord::new(7, 60), DrawRecord::new(7, 30), DrawRecord::new(7, 20)].into();
    let token = encode_token(&draws);

    let result = ConjectureRunner::new("sum_of_three", Settings::default().no_database().reproduce(token))
        .run(sum_of_three)
        .unwrap();
    let example = result.counterexample.unwrap();
    let values: Vec<Value> = example.arguments.into_iter().map(|(_, v)| v).collect();
    assert_eq!(values, vec![Value::Integer(60), Value::Integer(30), Value::Integer(20)]);
    assert_eq!(example.reason, FailureReason::Body("60 + 30 + 20 > 100".to_string()));
}

#[test]
fn test_passing_token_reports_passed() {
    init_logging();
    let draws: DrawSequence = vec![DrawRecord::new(7, 1), DrawRecord::new(7, 2), DrawRecord::new(7, 3)].into();
    let result = ConjectureRunner::new(
        "sum_of_three",
        Settings::default().no_database().reproduce(encode_token(&draws)),
    )
    .run(sum_of_three)
    .unwrap();
    assert_eq!(result.outcome, Outcome::Passed);
    assert!(result.counterexample.is_none());
}

#[test]
fn test_reproduction_uses_the_configured_deadline() {
    init_logging();
    let draws: DrawSequence = vec![DrawRecord::new(1, 1)].into();
    let settings = Settings::default()
        .no_database()
        .deadline(Some(Duration::from_millis(30)))
        .reproduce(encode_token(&draws));
    let result = ConjectureRunner::new("slow_when_one", settings)
        .run(|case| {
            if case.draw_integer(0, 1)? == 1 {
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(())
        })
        .unwrap();

    match result.outcome {
        Outcome::Failed(FailureReason::DeadlineExceeded { bound, .. }) => {
            assert_eq!(bound, Duration::from_millis(30));
        }
        other => panic!("expected a deadline failure, got {:?}", other),
    }
}

#[test]
fn test_unsupported_version_is_an_error() {
    init_logging();
    let token = URL_SAFE_NO_PAD.encode(b"CJ\x09\x00\x00\x00\x00");
    let result = ConjectureRunner::new("sum_of_three", Settings::default().no_database().reproduce(token))
        .run(sum_of_three);
    match result {
        Err(EngineError::Token(TokenError::UnsupportedVersion { found, supported })) => {
            assert_eq!(found, 9);
            assert_eq!(supported, 1);
        }
        other => panic!("expected an unsupported version error, got {:?}", other),
    }
}

#[test]
fn test_garbage_token_is_an_error() {
    init_logging();
    let result = ConjectureRunner::new("sum_of_three", Settings::default().no_database().reproduce("not a token!"))
        .run(sum_of_three);
    assert!(matches!(result, Err(EngineError::Token(_))));
}
