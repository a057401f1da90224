//! Throwaway PKI for tests: one CA and a server and client leaf it issued,
//! each usable for both server and client authentication.

use std::net::{IpAddr, Ipv4Addr};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};

use crate::tls::TlsMaterial;

/// PEM material for one leaf
pub struct TestIdentity {
    /// Leaf certificate alone
    pub leaf_pem:  String,
    /// Leaf followed by the CA, the layout the configurator expects
    pub chain_pem: String,
    /// PKCS#8 private key of the leaf
    pub key_pem:   String,
}

impl TestIdentity {
    pub fn material(&self) -> TlsMaterial {
        TlsMaterial::from_pem(self.chain_pem.as_bytes(), self.key_pem.as_bytes())
            .expect("generated material is valid")
    }
}

pub struct TestPki {
    pub ca_pem: String,
    pub ca_der: Vec<u8>,
    pub server: TestIdentity,
    pub client: TestIdentity,
}

impl TestPki {
    /// Generates a fresh CA and two leaves valid for `localhost` and
    /// `127.0.0.1`.
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("generate CA key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "trirpc test CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&ca_key).expect("self-sign CA");

        let server = issue_leaf("trirpc test server", &ca, &ca_key);
        let client = issue_leaf("trirpc test client", &ca, &ca_key);

        Self {
            ca_pem: ca.pem(),
            ca_der: ca.der().to_vec(),
            server,
            client,
        }
    }
}

fn issue_leaf(common_name: &str, ca: &Certificate, ca_key: &KeyPair) -> TestIdentity {
    let key = KeyPair::generate().expect("generate leaf key");
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).expect("leaf params");
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let leaf = params.signed_by(&key, ca, ca_key).expect("sign leaf");

    TestIdentity {
        leaf_pem:  leaf.pem(),
        chain_pem: format!("{}{}", leaf.pem(), ca.pem()),
        key_pem:   key.serialize_pem(),
    }
}
