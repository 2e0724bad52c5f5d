#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<encore_client::protocol::RequestEnvelope>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<encore_client::protocol::ClientRequest>(s);
    }
});
