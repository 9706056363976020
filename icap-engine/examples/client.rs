// Sends one REQMOD to the echo service and prints what came back.
//
// Start `cargo run --example server` first.

use icap_engine::Response;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let http_head = b"POST /upload HTTP/1.1\r\nHost: www.example.com\r\nContent-Length: 10\r\n\r\n";
    let mut request = format!(
        "REQMOD icap://127.0.0.1:1344/echo ICAP/1.0\r\n\
         Host: 127.0.0.1\r\n\
         Preview: 10\r\n\
         Encapsulated: req-hdr=0, req-body={}\r\n\r\n",
        http_head.len()
    )
    .into_bytes();
    request.extend_from_slice(http_head);
    request.extend_from_slice(b"A\r\nHi, there!\r\n0; ieof\r\n\r\n");

    let mut stream = BufReader::new(TcpStream::connect("127.0.0.1:1344").await?);
    stream.get_mut().write_all(&request).await?;

    let resp = Response::read_from(&mut stream).await?;
    print!("{resp}");
    println!("---");
    print!("{}", String::from_utf8_lossy(&resp.segments.req_hdr));
    println!("{}", String::from_utf8_lossy(&resp.segments.req_body));
    Ok(())
}
