use sorng_ftp::ftp::*;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

// A single-session scripted FTP server good enough to drive the client.
struct ScriptedServer {
    mlsd: bool,
    dirs: Vec<&'static str>,
    listing: &'static str,
    files: HashMap<&'static str, Vec<u8>>,
}

impl ScriptedServer {
    async fn spawn(self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            self.serve(sock).await;
        });
        port
    }

    async fn serve(self, sock: TcpStream) {
        let (rd, mut wr) = sock.into_split();
        let mut lines = BufReader::new(rd).lines();
        let mut data: Option<TcpListener> = None;

        wr.write_all(b"220 scripted ready\r\n").await.unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            let (cmd, arg) = match line.split_once(' ') {
                Some((c, a)) => (c.to_uppercase(), a.to_string()),
                None => (line.to_uppercase(), String::new()),
            };
            let reply: String = match cmd.as_str() {
                "USER" => "331 password please\r\n".into(),
                "PASS" if arg == "secret" => "230 logged in\r\n".into(),
                "PASS" => "530 bad login\r\n".into(),
                "FEAT" if self.mlsd => "211-Features:\r\n MLSD\r\n SIZE\r\n211 End\r\n".into(),
                "FEAT" => "211-Features:\r\n SIZE\r\n211 End\r\n".into(),
                "SYST" => "215 UNIX Type: L8\r\n".into(),
                "PWD" => "257 \"/\" is current\r\n".into(),
                "TYPE" => "200 type set\r\n".into(),
                "NOOP" => "200 ok\r\n".into(),
                "CWD" if self.dirs.contains(&arg.as_str()) => "250 ok\r\n".into(),
                "CWD" => "550 No such file or directory\r\n".into(),
                "PASV" => {
                    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let p = l.local_addr().unwrap().port();
                    data = Some(l);
                    format!("227 Entering Passive Mode (127,0,0,1,{},{})\r\n", p / 256, p % 256)
                }
                "LIST" | "MLSD" | "RETR" => {
                    let payload = if cmd == "RETR" {
                        self.files.get(arg.as_str()).cloned()
                    } else {
                        Some(self.listing.as_bytes().to_vec())
                    };
                    let Some(payload) = payload else {
                        wr.write_all(b"550 No such file\r\n").await.unwrap();
                        continue;
                    };
                    wr.write_all(b"150 opening data connection\r\n").await.unwrap();
                    let listener = data.take().unwrap();
                    let (mut ds, _) = listener.accept().await.unwrap();
                    ds.write_all(&payload).await.unwrap();
                    ds.shutdown().await.unwrap();
                    drop(ds);
                    "226 transfer complete\r\n".into()
                }
                "QUIT" => {
                    wr.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => "502 not implemented\r\n".into(),
            };
            wr.write_all(reply.as_bytes()).await.unwrap();
        }
    }
}

fn config(port: u16, password: &str) -> FtpConnectionConfig {
    FtpConnectionConfig {
        host: "127.0.0.1".into(),
        port,
        username: "mirror".into(),
        password: password.into(),
        ..Default::default()
    }
}

fn server() -> ScriptedServer {
    let mut files = HashMap::new();
    files.insert("S01E01.mkv", vec![7u8; 100]);
    ScriptedServer {
        mlsd: false,
        dirs: vec!["/show"],
        listing: "-rw-r--r--   1 ftp ftp  100 Jan  1  2026 S01E01.mkv\r\n\
                  drwxr-xr-x   2 ftp ftp 4096 Jan  1  2026 extras\r\n",
        files,
    }
}

#[tokio::test]
async fn test_connect_and_login() {
    let port = server().spawn().await;
    let mut client = FtpClient::connect(config(port, "secret")).await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.info.current_directory, "/");
    assert_eq!(client.info.system_type.as_deref(), Some("UNIX Type: L8"));
    assert!(!client.features.mlsd);
    assert_eq!(client.features.raw_features, vec!["SIZE".to_string()]);
    client.noop().await.unwrap();
    client.quit().await.unwrap();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_bad_password_is_auth_failure() {
    let port = server().spawn().await;
    let err = FtpClient::connect(config(port, "wrong")).await.err().unwrap();
    assert_eq!(err.kind, FtpErrorKind::AuthFailed);
    assert_eq!(err.code, Some(530));
}

#[tokio::test]
async fn test_cwd_into_missing_directory_is_not_found() {
    let port = server().spawn().await;
    let mut client = FtpClient::connect(config(port, "secret")).await.unwrap();
    let err = client.cwd("/missing").await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::NotFound);
    assert!(client.is_connected());
    client.cwd("/show").await.unwrap();
}

#[tokio::test]
async fn test_list_over_pasv() {
    let port = server().spawn().await;
    let mut client = FtpClient::connect(config(port, "secret")).await.unwrap();
    let entries = client.list("/show").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "S01E01.mkv");
    assert_eq!(entries[0].size, 100);
    assert_eq!(entries[1].kind, FtpEntryKind::Directory);
}

#[tokio::test]
async fn test_list_prefers_mlsd_when_advertised() {
    let mut srv = server();
    srv.mlsd = true;
    srv.listing = "type=file;size=42;modify=20260101120000; a.mkv\r\n";
    let port = srv.spawn().await;
    let mut client = FtpClient::connect(config(port, "secret")).await.unwrap();
    let entries = client.list("/show").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].size, 42);
}

#[tokio::test]
async fn test_retrieve_streams_file() {
    let port = server().spawn().await;
    let mut client = FtpClient::connect(config(port, "secret")).await.unwrap();
    let mut stream = client.begin_retrieve("S01E01.mkv").await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    drop(stream);
    client.finish_retrieve(buf.len() as u64).await.unwrap();

    assert_eq!(buf, vec![7u8; 100]);
    assert_eq!(client.info.bytes_downloaded, 100);

    // control channel still in sync afterwards
    client.noop().await.unwrap();
}

#[tokio::test]
async fn test_retrieve_missing_file_is_rejected() {
    let port = server().spawn().await;
    let mut client = FtpClient::connect(config(port, "secret")).await.unwrap();
    let err = client.begin_retrieve("nope.mkv").await.err().unwrap();
    assert_eq!(err.kind, FtpErrorKind::NotFound);
    assert!(client.is_connected());
}
