use std::any::Any;

/// Extracts a readable message from a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"panic with non-string payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use std::panic::{AssertUnwindSafe, catch_unwind};

	use super::panic_message;

	#[test]
	fn extracts_static_str_payload() {
		let err = catch_unwind(|| panic!("boom-str")).unwrap_err();
		assert_eq!(panic_message(err.as_ref()), "boom-str");
	}

	#[test]
	fn extracts_string_payload() {
		let value = 7;
		let err = catch_unwind(AssertUnwindSafe(|| panic!("boom-{value}"))).unwrap_err();
		assert_eq!(panic_message(err.as_ref()), "boom-7");
	}

	#[test]
	fn falls_back_for_other_payloads() {
		let err = catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
		assert_eq!(panic_message(err.as_ref()), "panic with non-string payload");
	}
}
