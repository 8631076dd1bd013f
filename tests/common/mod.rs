#![allow(dead_code)]

pub mod test_server {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::sync::Once;
    use std::time::Duration;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// Send raw bytes and read until the server closes the connection.
    pub fn send_request(addr: &SocketAddr, req: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        buf
    }

    /// A raw HTTP/1.1 response split into its parts.
    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    pub fn parse_response(raw: &[u8]) -> RawResponse {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head terminator");
        let head = std::str::from_utf8(&raw[..split]).unwrap();
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap();
        let status = status_line.split(' ').nth(1).unwrap().parse().unwrap();
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            .collect();
        RawResponse {
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }
}

pub mod dispatch {
    use brrtcore::dispatcher::{DispatchOutcome, Dispatcher};
    use brrtcore::exchange::MemoryExchange;
    use brrtcore::router::RouterBuilder;

    /// Build a dispatcher from a registration closure.
    pub fn dispatcher(register: impl FnOnce(&mut RouterBuilder)) -> Dispatcher {
        let mut builder = RouterBuilder::new();
        register(&mut builder);
        Dispatcher::new(builder.build())
    }

    /// Dispatch `exchange` and hand it back for inspection.
    pub fn run(dispatcher: &Dispatcher, mut exchange: MemoryExchange) -> (DispatchOutcome, MemoryExchange) {
        let outcome = dispatcher.dispatch(&mut exchange);
        (outcome, exchange)
    }

    pub fn get(dispatcher: &Dispatcher, target: &str) -> (DispatchOutcome, MemoryExchange) {
        run(dispatcher, MemoryExchange::get(target))
    }
}
