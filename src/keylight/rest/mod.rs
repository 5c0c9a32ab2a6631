use hyper::Uri;

pub mod accessory;
pub mod light;

fn device_uri(address: &str, port: u16, path: &str) -> Result<Uri, hyper::http::uri::InvalidUri> {
    format!("http://{}:{}/elgato/{}", address, port, path).parse()
}
