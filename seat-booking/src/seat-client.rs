use std::{io::Write, net::SocketAddr};

use anyhow::Context;
use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{lookup_host, TcpStream},
};

const DEFAULT_PORT: u16 = 8123;
const MENU: &str = "--- options:
\t1) Get list of available seats
\t2) Book one or more seats
\t3) Revoke a previous booking (unique code needed)
\t4) Exit

choice: ";

#[derive(clap::Parser, Debug)]
#[command(version, about = "Interactive client for the seat booking server", long_about = None)]
struct Args {
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    println!("resolving {}:{}...", args.host, args.port);
    let server = lookup_host((args.host.as_str(), args.port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .with_context(|| format!("unable to resolve \"{}\"", args.host))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(MENU)?;
        let Some(choice) = stdin.next_line().await? else {
            break; // EOF
        };
        println!("***");

        let outcome = match choice.trim().parse::<u32>() {
            Ok(1) => list_seats(server).await,
            Ok(2) => {
                prompt("seat coordinates (x1,y1) (x2,y2) ... : ")?;
                let Some(seats) = stdin.next_line().await? else {
                    break;
                };
                book_seats(server, &seats).await
            }
            Ok(3) => {
                prompt("unique code: ")?;
                let Some(code) = stdin.next_line().await? else {
                    break;
                };
                revoke_booking(server, code.trim()).await
            }
            Ok(4) => break,
            Ok(other) => {
                println!("unrecognized option: {}", other);
                Ok(())
            }
            Err(_) => {
                println!("invalid character for base 10");
                Ok(())
            }
        };

        if let Err(err) = outcome {
            tracing::error!("{:#}", err);
        }
    }

    Ok(())
}

fn prompt(text: &str) -> std::io::Result<()> {
    print!("{}", text);
    std::io::stdout().flush()
}

async fn list_seats(server: SocketAddr) -> anyhow::Result<()> {
    let response = exchange(server, "GetAvailableSeats").await?;

    println!("Available seats listing");
    println!("=======================");
    println!("{}", describe_listing(&response));
    println!("=======================\n");

    Ok(())
}

async fn book_seats(server: SocketAddr, seats: &str) -> anyhow::Result<()> {
    let request = format!("BookSeats{}", normalize_seats(seats));
    let response = exchange(server, &request).await?;

    println!("Seat booking");
    println!("============\n");
    println!("{}", describe_booking(&response));
    println!("\n============\n");

    Ok(())
}

async fn revoke_booking(server: SocketAddr, code: &str) -> anyhow::Result<()> {
    let response = exchange(server, &format!("RevokeBooking{}", code)).await?;

    println!("Revoke previous booking by unique code");
    println!("======================================\n");
    println!("{}", describe_revocation(&response));
    println!("\n======================================\n");

    Ok(())
}

// Sends one request frame on a fresh connection and reads the whole response.
async fn exchange(server: SocketAddr, request: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("unable to connect to {}", server))?;

    stream.write_all(request.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;

    // responses carry their NUL terminator
    if response.last() == Some(&0) {
        response.pop();
    }

    String::from_utf8(response).context("the server response is not valid utf-8")
}

/// Turns `(x1,y1) (x2,y2)` into the `x1,y1,x2,y2` wire form.
fn normalize_seats(seats: &str) -> String {
    seats
        .trim()
        .chars()
        .filter(|c| *c != '(' && *c != ')')
        .map(|c| if c == ' ' { ',' } else { c })
        .collect()
}

fn describe_listing(response: &str) -> String {
    if response.is_empty() {
        return "no seat is available".into();
    }

    let coordinates: Vec<&str> = response.split(',').collect();
    coordinates
        .chunks(2)
        .map(|seat| format!("seat = row: {} col: {}", seat[0], seat.get(1).unwrap_or(&"?")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_booking(response: &str) -> String {
    if let Some(code) = response.strip_prefix("Success:") {
        return format!("You did it! Here's your code: {}", code);
    }

    match response.strip_prefix("Fail:") {
        Some("notavail") => "One or more of your chosen seats already booked".into(),
        Some("exceed") => "Exceeding in terms of coordinates: \
            a coordinate is not a number, or lies outside the venue"
            .into(),
        Some("toomuch") => "Exceeding in terms of # seats: \
            more seats were requested than the venue holds"
            .into(),
        Some("noteven") => "Every seat needs both a row and a column".into(),
        Some("wholeempty") => "No seat was given".into(),
        Some(other) => format!("Something went wrong - error: {}", other),
        None => format!("Unexpected answer from the server: {:?}", response),
    }
}

fn describe_revocation(response: &str) -> String {
    match response {
        "Success" => "Correctly revoked!".into(),
        "Fail:nounique" => "Oops, we couldn't find any code matching yours!".into(),
        "Fail:notanumber" => "Server doesn't like any code which is not-a-number".into(),
        other => format!("Unexpected answer from the server: {:?}", other),
    }
}
