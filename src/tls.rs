use crate::error::Error;

/// Client certificate material for mutual TLS. All blobs are PEM encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsCredentials {
    ca_cert_pem: Vec<u8>,
    cert_chain_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
}

impl TlsCredentials {
    pub fn new(cert_chain_pem: impl Into<Vec<u8>>, private_key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            ca_cert_pem: Vec::new(),
            cert_chain_pem: cert_chain_pem.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    pub fn with_ca_cert(mut self, ca_cert_pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert_pem = ca_cert_pem.into();
        self
    }

    pub fn ca_cert_pem(&self) -> &[u8] {
        &self.ca_cert_pem
    }

    pub fn cert_chain_pem(&self) -> &[u8] {
        &self.cert_chain_pem
    }

    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key_pem
    }

    pub(crate) fn is_complete(&self) -> bool {
        !self.cert_chain_pem.is_empty() && !self.private_key_pem.is_empty()
    }
}

/// How a transport secures its connections.
///
/// Both TLS profiles skip server certificate verification. The CA blob of
/// [`TlsCredentials`] only seeds the root store handed to the TLS stack.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SecurityProfile {
    #[default]
    Plain,
    TlsInsecure,
    TlsWithClientCert(TlsCredentials),
}

impl SecurityProfile {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::TlsInsecure => "tls-insecure",
            Self::TlsWithClientCert(_) => "tls-client-cert",
        }
    }

    /// Profile used for `url`: plain for `http://`, client-cert TLS when a
    /// complete identity is configured, insecure TLS otherwise.
    pub fn for_url(url: &str, credentials: Option<&TlsCredentials>) -> Self {
        if !crate::util::is_https_url(url) {
            return Self::Plain;
        }
        match credentials {
            Some(credentials) if credentials.is_complete() => {
                Self::TlsWithClientCert(credentials.clone())
            }
            _ => Self::TlsInsecure,
        }
    }
}

pub(crate) fn credential_error(message: impl Into<String>) -> Error {
    Error::CredentialLoad {
        message: message.into(),
    }
}

fn parse_pem_certificates(
    pem_bundle: &[u8],
    context: &str,
) -> Result<Vec<ureq::tls::Certificate<'static>>, Error> {
    let mut certificates = Vec::new();
    for item in ureq::tls::parse_pem(pem_bundle) {
        let item = item.map_err(|source| {
            credential_error(format!("failed to parse PEM {context}: {source}"))
        })?;
        if let ureq::tls::PemItem::Certificate(certificate) = item {
            certificates.push(certificate);
        }
    }
    if certificates.is_empty() {
        return Err(credential_error(format!(
            "no certificate blocks found in PEM {context}"
        )));
    }
    Ok(certificates)
}

pub(crate) fn build_tls_config(profile: &SecurityProfile) -> Result<ureq::tls::TlsConfig, Error> {
    let builder = ureq::tls::TlsConfig::builder().provider(ureq::tls::TlsProvider::Rustls);
    match profile {
        SecurityProfile::Plain => Ok(builder.build()),
        SecurityProfile::TlsInsecure => Ok(builder.disable_verification(true).build()),
        SecurityProfile::TlsWithClientCert(credentials) => {
            let cert_chain =
                parse_pem_certificates(credentials.cert_chain_pem(), "client certificate chain")?;
            let private_key = ureq::tls::PrivateKey::from_pem(credentials.private_key_pem())
                .map_err(|source| {
                    credential_error(format!("failed to parse private key PEM: {source}"))
                })?;
            let roots = if credentials.ca_cert_pem().is_empty() {
                cert_chain.clone()
            } else {
                parse_pem_certificates(credentials.ca_cert_pem(), "ca certificate")?
            };
            let client_cert = ureq::tls::ClientCert::new_with_certs(&cert_chain, private_key);
            Ok(builder
                .root_certs(ureq::tls::RootCerts::new_with_certs(&roots))
                .client_cert(Some(client_cert))
                .disable_verification(true)
                .build())
        }
    }
}
