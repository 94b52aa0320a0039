// Bitonic(2w): two Bitonic(w) halves feed a Merger(2w). Input i routes
// through the half selected by i < w, then is offset by floor(i/w)*w so the
// two halves occupy disjoint, correctly-ordered input ranges of the merger.

use crate::counting_network::balancer::Balancer;
use crate::counting_network::merger::Merger;
use crate::error::{Result, ToolkitError};

enum Node {
    Base(Balancer),
    Recursive {
        half: usize,
        subs: [Box<Bitonic>; 2],
        merger: Merger,
    },
}

/// Width-`2w` bitonic counting network; `width` must be a power of two no
/// smaller than 2.
pub struct Bitonic {
    width: usize,
    node: Node,
}

impl Bitonic {
    pub fn new(width: usize) -> Result<Self> {
        if width < 2 || !width.is_power_of_two() {
            return Err(ToolkitError::InvalidArgument(format!(
                "bitonic network width must be a power of two >= 2, got {width}"
            )));
        }
        let node = if width == 2 {
            Node::Base(Balancer::new())
        } else {
            let half = width / 2;
            Node::Recursive {
                half,
                subs: [Box::new(Bitonic::new(half)?), Box::new(Bitonic::new(half)?)],
                merger: Merger::new(width)?,
            }
        };
        Ok(Self { width, node })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Routes one token that entered on input wire `input` (`< width`) to an
    /// output wire, also `< width`.
    pub fn route(&self, input: usize) -> usize {
        debug_assert!(input < self.width);
        match &self.node {
            Node::Base(balancer) => balancer.traverse(),
            Node::Recursive { half, subs, merger } => {
                let half_index = input / half;
                let local_input = input % half;
                let sub_output = subs[half_index].route(local_input);
                let merger_input = half_index * half + sub_output;
                merger.route(merger_input)
            }
        }
    }
}
