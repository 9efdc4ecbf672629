use std::ffi::{CStr, CString};
use std::{io, ptr};

use tracing::warn;

use crate::handler::selector::HostIdentity;

/// Get the short hostname and its canonical name. The fully qualified name falls back to the
/// short one when it can not be resolved.
pub fn current() -> HostIdentity {
    let short = match hostname() {
        Ok(name) => name,
        Err(e) => {
            warn!("fail to get hostname: {}", e);
            String::new()
        }
    };
    let fqdn = canonical_name(&short).unwrap_or_else(|| short.clone());
    HostIdentity::new(short, fqdn)
}

fn hostname() -> io::Result<String> {
    Ok(hostname::get()?.to_string_lossy().into_owned())
}

fn canonical_name(host: &str) -> Option<String> {
    if host.is_empty() {
        return None;
    }
    let node = CString::new(host).ok()?;
    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_flags = libc::AI_CANONNAME;
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let ret = unsafe { libc::getaddrinfo(node.as_ptr(), ptr::null(), &hints, &mut res) };
    if ret != 0 || res.is_null() {
        return None;
    }
    let name = unsafe {
        let canonical = (*res).ai_canonname;
        if canonical.is_null() {
            None
        } else {
            Some(CStr::from_ptr(canonical).to_string_lossy().into_owned())
        }
    };
    unsafe { libc::freeaddrinfo(res) };
    name.filter(|name| !name.is_empty())
}
