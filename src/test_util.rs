use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    sync::Once,
};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::PKey,
    ssl::{SslAcceptor, SslMethod},
    x509::{X509, X509NameBuilder, extension::SubjectAlternativeName},
};
use tracing_subscriber::EnvFilter;

static TRACE_INIT: Once = Once::new();

/// Installs a test subscriber once per process. Set `TEST_LOG` to change the
/// filter.
pub fn trace_init() {
    TRACE_INIT.call_once(|| {
        let filter = std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_test_writer()
            .try_init();
    });
}

/// Generates a self signed certificate, returning the PEM encoded
/// certificate and PKCS#8 private key.
pub fn self_signed_certificate(common_name: &str) -> (Vec<u8>, Vec<u8>) {
    certificate(common_name, None)
}

/// Like [`self_signed_certificate`], valid for the DNS name `dns_name`.
pub fn server_certificate(dns_name: &str) -> (Vec<u8>, Vec<u8>) {
    certificate(dns_name, Some(dns_name))
}

fn certificate(common_name: &str, dns_name: Option<&str>) -> (Vec<u8>, Vec<u8>) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    if let Some(dns_name) = dns_name {
        let san = SubjectAlternativeName::new()
            .dns(dns_name)
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    let cert = builder.build();
    (
        cert.to_pem().unwrap(),
        key.private_key_to_pem_pkcs8().unwrap(),
    )
}

/// Starts a TLS server on localhost answering every request with an empty
/// `200 OK`. Failed handshakes are dropped.
pub fn serve_tls(cert: &[u8], key: &[u8]) -> SocketAddr {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    acceptor
        .set_certificate(&X509::from_pem(cert).unwrap())
        .unwrap();
    acceptor
        .set_private_key(&PKey::private_key_from_pem(key).unwrap())
        .unwrap();
    let acceptor = acceptor.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let Ok(mut stream) = acceptor.accept(stream) else {
                continue;
            };
            let mut request = [0; 4096];
            if stream.read(&mut request).is_ok() {
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                );
            }
            let _ = stream.shutdown();
        }
    });
    addr
}
