use std::ffi::CStr;

use anyhow::Context as _;
use itertools::Itertools;

use crate::OctaResult;

#[derive(Clone)]
pub struct Entry {
    pub inner: ash::Entry,
}

impl Entry {
    pub fn new() -> OctaResult<Self> {
        let inner = unsafe { ash::Entry::load() }
            .context("Failed to load the Vulkan library")?;

        Ok(Self {
            inner,
        })
    }

    pub fn check_layer_support(&self, layers: &[&str]) -> OctaResult<bool> {

        layers.iter()
            .map(|wanted_layer|  {
                let found = unsafe{
                    self.inner.enumerate_instance_layer_properties()?
                        .iter()
                        .map::<OctaResult<bool>, _>(|layer| {
                            let name = CStr::from_ptr(layer.layer_name.as_ptr());
                            let name = name.to_str().context("Failed to get layer name pointer")?;
                            Ok(wanted_layer == &name)
                        })
                        .process_results(|mut iter | iter
                            .any(|b| b)
                        )?
                };

                if !found {
                    log::warn!("Layer not supported: {:?}", wanted_layer);
                }

                Ok(found)
            })
            .process_results(|mut iter| iter
                .all(|b| b)
            )
    }
}
