use clap::Parser;
use statusd::client::{Action, NodeClient, Session};
use statusd::proto::{Push, SessionMessage};
use statusd::{RecordId, StatusRecord};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    #[clap(name = "addr", global = true, long, default_value = "localhost:4000")]
    server: String,

    #[clap(subcommand)]
    subcmd: Action,
}

fn print_record(record: &StatusRecord) {
    println!(
        "{}\t{}\t{}\t{}",
        record.id,
        record.identity,
        record.text,
        record.timestamp.to_rfc3339()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = App::parse();
    let client = NodeClient::new(cli.server);
    match cli.subcmd {
        Action::Create { identity, text } => print_record(&client.create(&identity, &text).await?),
        Action::Get { id } => match client.get(RecordId(id)).await? {
            Some(record) => print_record(&record),
            None => {
                eprintln!("Status not found");
                std::process::exit(1);
            }
        },
        Action::Update { id, identity, text } => {
            print_record(&client.update(RecordId(id), &identity, &text).await?)
        }
        Action::Remove { id } => match client.remove(RecordId(id)).await {
            Ok(()) => {}
            Err(statusd::Error::NotFound(_)) => {
                eprintln!("Status not found");
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        },
        Action::List => {
            for record in client.list().await? {
                print_record(&record);
            }
        }
        Action::Watch { identity } => watch(client.subscribe().await?, identity).await?,
    }

    Ok(())
}

async fn watch(session: Session, identity: String) -> anyhow::Result<()> {
    let (mut pushes, mut sink) = session.split();
    let printer = tokio::spawn(async move {
        while let Some(push) = pushes.next_push().await? {
            match push {
                Push::Subscribed(connection) => eprintln!("Connected as {connection}"),
                Push::Status(record) | Push::Init(record) => print_record(&record),
                Push::Delete(id) => println!("{id}\tremoved"),
                Push::Error(reason) => eprintln!("{reason}"),
            }
        }
        Ok::<_, statusd::Error>(())
    });

    sink.send(&SessionMessage::RequestStatuses).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => {
                sink.send(&SessionMessage::Disconnect { identity }).await?;
                printer.abort();
                return Ok(());
            }
            "" => {}
            text => sink.post_status(&identity, text).await?,
        }
    }

    printer.await??;
    Ok(())
}
